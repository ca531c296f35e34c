//! 结构化输出恢复：分阶段解析模型返回的 JSON
//!
//! 1. 直接解析
//! 2. 去掉 Markdown 围栏，截取第一个与最后一个括号之间的子串
//! 3. 文本修复（尾逗号、缺失分隔符、控制字符、括号补齐与截断元素丢弃）
//!
//! 每阶段仅在上一阶段失败时尝试；修复对字符串字面量内部只做控制字符删除，且幂等。

use serde_json::Value;
use thiserror::Error;

/// 截断元素的最多丢弃次数
const MAX_TRUNCATION_CUTS: usize = 8;
/// 错误信息中原文的最大字符数
const EXCERPT_CHARS: usize = 200;

/// 解析成功时使用的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStage {
    Direct,
    Extracted,
    Repaired,
}

/// 三个阶段均失败
#[derive(Error, Debug, Clone)]
#[error("Unparseable structured output ({reason}): {excerpt}")]
pub struct ParseFailure {
    pub reason: String,
    pub excerpt: String,
}

/// 分阶段解析模型输出
pub fn parse_structured(raw: &str) -> Result<(Value, RecoveryStage), ParseFailure> {
    let trimmed = raw.trim();
    let direct_err = match serde_json::from_str::<Value>(trimmed) {
        Ok(v) => return Ok((v, RecoveryStage::Direct)),
        Err(e) => e,
    };

    let extracted = extract_structure(trimmed);
    if let Some(ref candidate) = extracted {
        if let Ok(v) = serde_json::from_str::<Value>(candidate) {
            return Ok((v, RecoveryStage::Extracted));
        }
    }

    let Some(mut candidate) = extracted else {
        return Err(ParseFailure {
            reason: format!("no JSON object or array found ({direct_err})"),
            excerpt: excerpt(trimmed),
        });
    };

    let truncated = is_truncated(&candidate);
    let mut last_err = direct_err.to_string();
    for _ in 0..=MAX_TRUNCATION_CUTS {
        let repaired = repair(&candidate);
        match serde_json::from_str::<Value>(&repaired) {
            Ok(v) => return Ok((v, RecoveryStage::Repaired)),
            Err(e) => last_err = e.to_string(),
        }
        if !truncated {
            break;
        }
        match drop_trailing_element(&candidate) {
            Some(shorter) => candidate = shorter,
            None => break,
        }
    }

    Err(ParseFailure {
        reason: last_err,
        excerpt: excerpt(trimmed),
    })
}

/// 去掉 ``` 围栏行，并截取第一个开括号到最后一个闭括号（无闭括号时截到末尾，交给修复阶段补齐）
pub fn extract_structure(text: &str) -> Option<String> {
    let unfenced: String = text
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n");

    let start = unfenced.find(['{', '['])?;
    let end = unfenced
        .rfind(['}', ']'])
        .filter(|&end| end > start)
        .map(|end| end + 1)
        .unwrap_or(unfenced.len());
    Some(unfenced[start..end].to_string())
}

/// 应用全部文本修复
pub fn repair(text: &str) -> String {
    balance(&fix_separators(&strip_control_chars(text)))
}

/// 删除未转义的控制字符；字符串外保留普通空白
fn strip_control_chars(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
                if c.is_control() {
                    out.pop();
                    continue;
                }
                out.push(c);
            } else if c == '\\' {
                escaped = true;
                out.push(c);
            } else if c == '"' {
                in_string = false;
                out.push(c);
            } else if !c.is_control() {
                out.push(c);
            }
        } else if c == '"' {
            in_string = true;
            out.push(c);
        } else if !c.is_control() || matches!(c, '\n' | '\r' | '\t') {
            out.push(c);
        }
    }
    out
}

/// 删除闭括号前的尾逗号，并在相邻的「闭合 → 开启」记号之间补逗号
fn fix_separators(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut in_string = false;
    let mut escaped = false;
    // 最后一个有效（非空白、字符串外）字符及其在 out 中的字节位置
    let mut last_sig: Option<(char, usize)> = None;

    for c in text.chars() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
                last_sig = Some(('"', out.len() - 1));
            }
            continue;
        }
        match c {
            '}' | ']' => {
                if let Some((',', idx)) = last_sig {
                    out.remove(idx);
                }
                out.push(c);
                last_sig = Some((c, out.len() - 1));
            }
            '{' | '[' | '"' => {
                if matches!(last_sig, Some(('}' | ']' | '"', _))) {
                    out.push(',');
                }
                out.push(c);
                if c == '"' {
                    in_string = true;
                } else {
                    last_sig = Some((c, out.len() - 1));
                }
            }
            c if c.is_whitespace() => out.push(c),
            _ => {
                out.push(c);
                last_sig = Some((c, out.len() - c.len_utf8()));
            }
        }
    }
    out
}

/// 补齐缺失的闭括号；丢弃无法配对的闭括号；闭合未结束的字符串
fn balance(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 4);
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '{' => {
                stack.push('}');
                out.push(c);
            }
            '[' => {
                stack.push(']');
                out.push(c);
            }
            '}' | ']' => {
                if stack.last() == Some(&c) {
                    stack.pop();
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }

    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }

    loop {
        let trimmed = out.trim_end();
        if let Some(stripped) = trimmed.strip_suffix(',') {
            out = stripped.to_string();
        } else if trimmed.ends_with(':') {
            out = format!("{trimmed} null");
        } else {
            out.truncate(trimmed.len());
            break;
        }
    }

    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

/// 文本在字符串内结束或括号未闭合，视为被截断
fn is_truncated(text: &str) -> bool {
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => depth -= 1,
            _ => {}
        }
    }
    in_string || depth > 0
}

/// 丢弃最后一个逗号之后的（不完整）元素
fn drop_trailing_element(text: &str) -> Option<String> {
    let mut in_string = false;
    let mut escaped = false;
    let mut last_comma = None;
    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            ',' => last_comma = Some(i),
            _ => {}
        }
    }
    last_comma.map(|i| text[..i].to_string())
}

fn excerpt(text: &str) -> String {
    text.chars().take(EXCERPT_CHARS).collect()
}

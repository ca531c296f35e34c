//! 视觉参考：拉取参考图并交给外部描述服务
//!
//! 任何失败（拉取、描述）都降级为「无参考」，不中断生成。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 参考图描述
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceDescription {
    pub subject: String,
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub palette: Vec<String>,
    #[serde(default)]
    pub structural_elements: Vec<String>,
}

impl ReferenceDescription {
    /// 拼入生成提示的文本
    pub fn to_prompt(&self) -> String {
        format!(
            "Visual reference: subject '{}', style '{}', palette [{}], structural elements [{}].",
            self.subject,
            self.style,
            self.palette.join(", "),
            self.structural_elements.join(", ")
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReferenceError {
    #[error("Failed to fetch reference image: {0}")]
    Fetch(String),
    #[error("Reference description failed: {0}")]
    Describe(String),
}

/// 外部视觉描述服务边界
#[async_trait]
pub trait VisualReference: Send + Sync {
    async fn describe(&self, image: &[u8], request: &str) -> Result<ReferenceDescription, ReferenceError>;
}

/// 拉取参考图：http(s) 走 reqwest，其余按本地路径读取
pub async fn fetch_image(reference: &str, timeout: Duration) -> Result<Vec<u8>, ReferenceError> {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        let resp = client
            .get(reference)
            .send()
            .await
            .map_err(|e| ReferenceError::Fetch(format!("Request failed: {}", e)))?;
        if !resp.status().is_success() {
            return Err(ReferenceError::Fetch(format!("HTTP {}", resp.status())));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ReferenceError::Fetch(format!("Read body: {}", e)))?;
        return Ok(bytes.to_vec());
    }

    tokio::fs::read(reference)
        .await
        .map_err(|e| ReferenceError::Fetch(format!("{}: {}", reference, e)))
}

/// 拉取并描述参考图；失败降级为 None
pub async fn resolve_reference(
    service: &dyn VisualReference,
    image_reference: &str,
    request: &str,
    timeout: Duration,
) -> Option<ReferenceDescription> {
    let result = match fetch_image(image_reference, timeout).await {
        Ok(bytes) => service.describe(&bytes, request).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(description) => {
            tracing::info!(subject = %description.subject, "Visual reference attached");
            Some(description)
        }
        Err(e) => {
            tracing::warn!("{}; continuing without reference", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedReference(Result<ReferenceDescription, ReferenceError>);

    #[async_trait]
    impl VisualReference for FixedReference {
        async fn describe(&self, image: &[u8], _request: &str) -> Result<ReferenceDescription, ReferenceError> {
            assert!(!image.is_empty());
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_local_image_is_described() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.png");
        std::fs::write(&path, [0x89, b'P', b'N', b'G']).unwrap();

        let service = FixedReference(Ok(ReferenceDescription {
            subject: "lighthouse".into(),
            style: "coastal".into(),
            palette: vec!["white_concrete".into()],
            structural_elements: vec!["cylinder".into()],
        }));
        let description = resolve_reference(&service, path.to_str().unwrap(), "build this", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(description.subject, "lighthouse");
        assert!(description.to_prompt().contains("white_concrete"));
    }

    #[tokio::test]
    async fn test_missing_file_degrades_to_none() {
        let service = FixedReference(Ok(ReferenceDescription::default()));
        let result = resolve_reference(&service, "/nonexistent/ref.png", "x", Duration::from_secs(1)).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_describe_failure_degrades_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.jpg");
        std::fs::write(&path, [1, 2, 3]).unwrap();
        let service = FixedReference(Err(ReferenceError::Describe("quota".into())));
        let result = resolve_reference(&service, path.to_str().unwrap(), "x", Duration::from_secs(1)).await;
        assert!(result.is_none());
    }
}

//! 建造上下文：路由与管线共享的显式依赖集合
//!
//! 启动时构造一次，之后只读；取消令牌同时交给容错客户端，使重试在取消后不再发起新尝试。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::llm::{create_client_from_config, LlmClient, ResilientGenerationClient, RetryPolicy};
use crate::pipeline::{Analyzer, GenerationPipeline, HeuristicAnalyzer, VisualReference};
use crate::router::catalog::{AssetLoader, Catalog, FileAssetLoader, LocalCatalog};

pub struct BuildContext {
    pub config: Arc<AppConfig>,
    pub client: Arc<ResilientGenerationClient>,
    pub analyzer: Arc<dyn Analyzer>,
    pub reference: Option<Arc<dyn VisualReference>>,
    pub catalog: Arc<dyn Catalog>,
    pub loader: Arc<dyn AssetLoader>,
    pub cancel: CancellationToken,
}

impl BuildContext {
    /// 默认协作者：启发式分析器、本地目录、文件加载器，无视觉参考
    pub fn new(config: AppConfig, llm: Arc<dyn LlmClient>) -> Self {
        let cancel = CancellationToken::new();
        let client = ResilientGenerationClient::new(llm, RetryPolicy::from_config(&config.generation))
            .with_cancel_token(cancel.clone());
        let catalog_dir = config.routing.catalog_dir();
        Self {
            client: Arc::new(client),
            analyzer: Arc::new(HeuristicAnalyzer::new()),
            reference: None,
            catalog: Arc::new(LocalCatalog::open(&catalog_dir)),
            loader: Arc::new(FileAssetLoader::new().with_base_dir(catalog_dir)),
            cancel,
            config: Arc::new(config),
        }
    }

    /// 按 [llm] 段选择模型后端
    pub fn from_config(config: AppConfig) -> Self {
        let llm = create_client_from_config(&config.llm);
        Self::new(config, llm)
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_reference(mut self, reference: Arc<dyn VisualReference>) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn AssetLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// 每条建造单元一个管线实例，共享客户端与取消令牌
    pub fn pipeline(&self) -> GenerationPipeline {
        GenerationPipeline::new(self.config.clone(), self.client.clone())
            .with_reference(self.reference.clone())
            .with_cancel_token(self.cancel.clone())
    }
}

//! Composition root.
//!
//! [`Services`] opens the state store and knowledge base named in the
//! configuration and hands out the components built on them. Commands
//! construct one `Services` and pass it down; nothing is global.

use std::sync::Arc;

use docbridge_core::store::KnowledgeBase;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::error::Result;
use crate::export::ExportPackager;
use crate::extract::FileTextExtractor;
use crate::fields::KeywordFieldClassifier;
use crate::merge::SyncReconciler;
use crate::orchestrator::{Collaborators, ProcessingOrchestrator};
use crate::scanner::FsFolderScanner;
use crate::sqlite_kb::SqliteKnowledgeBase;
use crate::state::StateStore;
use crate::tracker::FileChangeTracker;
use crate::traits::VisionExtractor;
use crate::vision::{OllamaVisionExtractor, PdftoppmRasterizer};

pub struct Services {
    pub config: Config,
    pub state: StateStore,
    pub knowledge_base: Arc<SqliteKnowledgeBase>,
}

impl Services {
    /// Open (creating if needed) the stores configured in `config`.
    pub async fn open(config: Config) -> Result<Self> {
        let state = StateStore::open(&config.state.path).await?;
        let knowledge_base = Arc::new(SqliteKnowledgeBase::open(&config.knowledge_base.path).await?);
        Ok(Self {
            config,
            state,
            knowledge_base,
        })
    }

    pub fn kb(&self) -> Arc<dyn KnowledgeBase> {
        self.knowledge_base.clone()
    }

    pub fn tracker(&self) -> FileChangeTracker {
        FileChangeTracker::new(self.state.clone())
    }

    /// Production collaborators built from configuration.
    pub fn collaborators(&self) -> Result<Collaborators> {
        let vision: Option<Arc<dyn VisionExtractor>> = if self.config.vision.is_enabled() {
            Some(Arc::new(OllamaVisionExtractor::new(&self.config.vision)?))
        } else {
            None
        };

        Ok(Collaborators {
            scanner: Arc::new(FsFolderScanner::new(&self.config.scan)?),
            text: Arc::new(FileTextExtractor),
            vision,
            rasterizer: Arc::new(PdftoppmRasterizer::new(&self.config.vision)),
            embedder: create_embedder(&self.config.embedding)?,
            knowledge_base: self.kb(),
            fields: Arc::new(KeywordFieldClassifier::new(&self.config.fields)),
        })
    }

    pub fn orchestrator(&self) -> Result<ProcessingOrchestrator> {
        Ok(ProcessingOrchestrator::new(
            self.tracker(),
            self.collaborators()?,
            self.config.chunking.options(),
        ))
    }

    pub fn packager(&self) -> ExportPackager {
        ExportPackager::new(self.config.clone(), self.state.clone(), self.kb())
    }

    pub fn reconciler(&self) -> SyncReconciler {
        SyncReconciler::new(self.state.clone(), self.kb())
    }

    /// Flush and close both stores.
    pub async fn close(&self) -> Result<()> {
        self.knowledge_base.flush().await?;
        self.knowledge_base.close().await;
        self.state.close().await;
        Ok(())
    }
}

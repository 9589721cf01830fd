//! Immutable application context shared by every connection.

use std::sync::Arc;

use wb_core::{Authenticator, Root};

use crate::config::ServerConfig;

pub type SharedContext = Arc<AppContext>;

#[derive(Debug)]
pub struct AppContext {
    pub config: ServerConfig,
    pub auth: Authenticator,
}

impl AppContext {
    pub fn new(config: ServerConfig) -> SharedContext {
        let auth = Authenticator::new(config.token.clone());
        Arc::new(Self { config, auth })
    }

    pub fn root(&self) -> &Root {
        &self.config.root
    }
}

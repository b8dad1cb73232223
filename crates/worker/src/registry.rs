//! 处理器注册表
//!
//! 以命令名为键保存处理器。重复注册以最后一次为准，不报错。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use scheduler_domain::ports::handler::{HandlerDescriptor, TaskHandler};
use scheduler_infrastructure::StructuredLogger;

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器，返回被替换的旧处理器
    pub async fn register(&self, handler: Arc<dyn TaskHandler>) -> Option<Arc<dyn TaskHandler>> {
        let command_name = handler.command_name().to_string();
        let handler_name = handler.name().to_string();
        let previous = self
            .handlers
            .write()
            .await
            .insert(command_name.clone(), handler);
        StructuredLogger::log_handler_registered(&command_name, &handler_name, previous.is_some());
        previous
    }

    pub async fn register_batch(&self, handlers: Vec<Arc<dyn TaskHandler>>) {
        for handler in handlers {
            self.register(handler).await;
        }
    }

    pub async fn lookup(&self, command_name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.read().await.get(command_name).cloned()
    }

    pub async fn unregister(&self, command_name: &str) -> bool {
        self.handlers.write().await.remove(command_name).is_some()
    }

    pub async fn contains(&self, command_name: &str) -> bool {
        self.handlers.read().await.contains_key(command_name)
    }

    pub async fn count(&self) -> usize {
        self.handlers.read().await.len()
    }

    pub async fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// 按命令名排序的处理器描述
    pub async fn describe_all(&self) -> Vec<HandlerDescriptor> {
        let mut descriptors: Vec<HandlerDescriptor> = self
            .handlers
            .read()
            .await
            .values()
            .map(HandlerDescriptor::of)
            .collect();
        descriptors.sort_by(|a, b| a.command_name.cmp(&b.command_name));
        descriptors
    }
}

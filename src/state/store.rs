//! 记录存储
//!
//! 工作负载与部署记录的持久化抽象（find_by_id / find_all / update / delete），
//! 附带内存实现

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::{Deployment, Workload};

/// 存储错误
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
    #[error("{kind} {id} already exists")]
    AlreadyExists { kind: &'static str, id: String },
    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// 记录存储抽象
#[async_trait]
pub trait WorkloadStore: Send + Sync {
    async fn find_workload(&self, id: &str) -> StoreResult<Option<Workload>>;

    /// 按创建时间排序
    async fn find_all_workloads(&self) -> StoreResult<Vec<Workload>>;

    async fn insert_workload(&self, workload: Workload) -> StoreResult<()>;

    /// 整条覆盖，记录不存在时返回 NotFound
    async fn update_workload(&self, workload: &Workload) -> StoreResult<()>;

    async fn delete_workload(&self, id: &str) -> StoreResult<bool>;

    async fn find_deployment(&self, id: &str) -> StoreResult<Option<Deployment>>;

    async fn find_all_deployments(&self) -> StoreResult<Vec<Deployment>>;

    async fn insert_deployment(&self, deployment: Deployment) -> StoreResult<()>;

    async fn update_deployment(&self, deployment: &Deployment) -> StoreResult<()>;

    async fn delete_deployment(&self, id: &str) -> StoreResult<bool>;
}

/// 内存存储
pub struct MemoryStore {
    workloads: RwLock<HashMap<String, Workload>>,
    deployments: RwLock<HashMap<String, Deployment>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            workloads: RwLock::new(HashMap::new()),
            deployments: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkloadStore for MemoryStore {
    async fn find_workload(&self, id: &str) -> StoreResult<Option<Workload>> {
        Ok(self.workloads.read().await.get(id).cloned())
    }

    async fn find_all_workloads(&self) -> StoreResult<Vec<Workload>> {
        let mut all: Vec<Workload> = self.workloads.read().await.values().cloned().collect();
        all.sort_by_key(|w| w.created_at);
        Ok(all)
    }

    async fn insert_workload(&self, workload: Workload) -> StoreResult<()> {
        let mut workloads = self.workloads.write().await;
        if workloads.contains_key(&workload.id) {
            return Err(StoreError::AlreadyExists {
                kind: "workload",
                id: workload.id,
            });
        }
        workloads.insert(workload.id.clone(), workload);
        Ok(())
    }

    async fn update_workload(&self, workload: &Workload) -> StoreResult<()> {
        let mut workloads = self.workloads.write().await;
        match workloads.get_mut(&workload.id) {
            Some(existing) => {
                *existing = workload.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                kind: "workload",
                id: workload.id.clone(),
            }),
        }
    }

    async fn delete_workload(&self, id: &str) -> StoreResult<bool> {
        Ok(self.workloads.write().await.remove(id).is_some())
    }

    async fn find_deployment(&self, id: &str) -> StoreResult<Option<Deployment>> {
        Ok(self.deployments.read().await.get(id).cloned())
    }

    async fn find_all_deployments(&self) -> StoreResult<Vec<Deployment>> {
        let mut all: Vec<Deployment> = self.deployments.read().await.values().cloned().collect();
        all.sort_by_key(|d| d.created_at);
        Ok(all)
    }

    async fn insert_deployment(&self, deployment: Deployment) -> StoreResult<()> {
        let mut deployments = self.deployments.write().await;
        if deployments.contains_key(&deployment.id) {
            return Err(StoreError::AlreadyExists {
                kind: "deployment",
                id: deployment.id,
            });
        }
        deployments.insert(deployment.id.clone(), deployment);
        Ok(())
    }

    async fn update_deployment(&self, deployment: &Deployment) -> StoreResult<()> {
        let mut deployments = self.deployments.write().await;
        match deployments.get_mut(&deployment.id) {
            Some(existing) => {
                *existing = deployment.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                kind: "deployment",
                id: deployment.id.clone(),
            }),
        }
    }

    async fn delete_deployment(&self, id: &str) -> StoreResult<bool> {
        Ok(self.deployments.write().await.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WorkloadStatus;

    #[tokio::test]
    async fn test_workload_crud() {
        let store = MemoryStore::new();
        store
            .insert_workload(Workload::new_pending("w-1", "d-1"))
            .await
            .unwrap();

        let mut workload = store.find_workload("w-1").await.unwrap().unwrap();
        workload.status = WorkloadStatus::Running;
        store.update_workload(&workload).await.unwrap();
        assert_eq!(
            store.find_workload("w-1").await.unwrap().unwrap().status,
            WorkloadStatus::Running
        );

        assert!(store.delete_workload("w-1").await.unwrap());
        assert!(!store.delete_workload("w-1").await.unwrap());
        assert!(store.find_workload("w-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_missing_workload_fails() {
        let store = MemoryStore::new();
        let err = store
            .update_workload(&Workload::new_pending("missing", "d"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "workload", .. }));
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = MemoryStore::new();
        store
            .insert_deployment(Deployment::new("d-1", None, "first"))
            .await
            .unwrap();
        let err = store
            .insert_deployment(Deployment::new("d-1", None, "again"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
        assert_eq!(store.find_all_deployments().await.unwrap().len(), 1);
    }
}

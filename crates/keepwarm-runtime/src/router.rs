//! Singleton router: every inbound request goes to the one instance.

use std::sync::Arc;

use keepwarm_core::{Placement, SingletonKey};

use crate::backend::{ForwardRequest, ForwardResponse};
use crate::controller::{InstanceController, InstanceHandle};
use crate::error::LifecycleError;

/// Maps any request to the fixed singleton key and delegates delivery.
///
/// The placement hint is passed along on creation only; it never changes
/// which instance a request reaches.
#[derive(Clone)]
pub struct SingletonRouter {
    controller: Arc<InstanceController>,
    key: SingletonKey,
    placement: Placement,
}

impl SingletonRouter {
    pub fn new(controller: Arc<InstanceController>) -> Self {
        Self {
            controller,
            key: SingletonKey::global(),
            placement: Placement::preferred(),
        }
    }

    pub fn key(&self) -> &SingletonKey {
        &self.key
    }

    pub fn controller(&self) -> &Arc<InstanceController> {
        &self.controller
    }

    pub async fn route(&self, request: ForwardRequest) -> Result<ForwardResponse, LifecycleError> {
        let handle = self.instance().await?;
        self.controller.forward(&handle, request).await
    }

    /// The singleton's handle, created on first use.
    pub async fn instance(&self) -> Result<InstanceHandle, LifecycleError> {
        self.controller.resolve(&self.key, &self.placement).await
    }
}

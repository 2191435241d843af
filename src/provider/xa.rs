// # Embedded XA Provider
//
// Builds bounded pools of XA backend sessions. Availability requires the
// driver registry to resolve an XA driver at pool creation; a scheme
// without one fails the creation and lets the registry demote this
// provider if the failure is systemic.

use crate::error::Result;
use crate::pool::pool::{Pool, PoolSettings};
use crate::provider::{PoolProvider, PoolSpec, ProviderDescriptor, ProviderKind, XaSessionPool};
use crate::xa::pool::XaSessionFactory;
use async_trait::async_trait;
use std::sync::Arc;

pub struct XaSessionProvider;

#[async_trait]
impl PoolProvider for XaSessionProvider {
    fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor::new("ojp-xa", 100, ProviderKind::Xa)
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn create_xa_pool(&self, spec: &PoolSpec) -> Result<Arc<XaSessionPool>> {
        let factory = Arc::new(XaSessionFactory::for_spec(spec)?);
        let settings = PoolSettings {
            leak_detection_threshold: spec.leak_detection_threshold,
            ..PoolSettings::from(spec.config.as_ref())
        };
        Ok(Arc::new(Pool::new(
            spec.conn_hash.to_string(),
            settings,
            factory,
        )))
    }
}

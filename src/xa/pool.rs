// # XA Session Pool Factory
//
// Pooled-object factory producing `XaBackendSession`s. The vendor driver is
// resolved from the URL scheme through the XA driver registry; an unknown
// family is a configuration error surfaced at pool creation. Sessions still
// associated with a branch never reach the idle set: passivation rejects
// them and the pool destroys the wrapper instead.

use crate::backend::driver::XaDriver;
use crate::config::properties::Properties;
use crate::error::{OjpError, Result};
use crate::pool::pooled::PooledObjectFactory;
use crate::provider::PoolSpec;
use crate::xa::session::XaBackendSession;
use async_trait::async_trait;
use std::sync::Arc;

pub struct XaSessionFactory {
    driver: Arc<dyn XaDriver>,
    url: String,
    props: Properties,
}

impl XaSessionFactory {
    pub fn new(driver: Arc<dyn XaDriver>, url: String, props: Properties) -> Self {
        Self { driver, url, props }
    }

    pub fn for_spec(spec: &PoolSpec) -> Result<Self> {
        let driver = spec.drivers.xa_driver_for(&spec.backend_url)?;
        Ok(Self::new(
            driver,
            spec.backend_url.clone(),
            spec.config.pass_through.clone(),
        ))
    }

}

#[async_trait]
impl PooledObjectFactory<XaBackendSession> for XaSessionFactory {
    async fn create(&self) -> Result<XaBackendSession> {
        let conn = self.driver.connect_xa(&self.url, &self.props).await?;
        Ok(XaBackendSession::new(conn))
    }

    async fn validate(&self, session: &mut XaBackendSession) -> bool {
        session.is_valid().await
    }

    async fn passivate(&self, session: &mut XaBackendSession) -> Result<()> {
        if let Some(xid) = session.current_xid() {
            return Err(OjpError::InvalidState(format!(
                "XA session still associated with {}",
                xid
            )));
        }
        session.connection().rollback().await
    }

    async fn destroy(&self, mut session: XaBackendSession) {
        if let Err(e) = session.close().await {
            tracing::debug!(error = %e, "error closing XA backend session");
        }
    }
}

//! Data-plane endpoint availability
//!
//! A freshly created account is visible on the control plane well before
//! its per-service endpoints answer. Nothing may talk to a data-plane
//! endpoint until [`wait_for_data_plane`] has seen it respond.

use crate::account::AccountDetails;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use storeflow_cloud::{
    CloudError, OperationContext, PollReport, Poller, PollerConfig, Probe, ProbeStatus, Result,
};

const PROBE_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataPlaneService {
    Blob,
    Queue,
    File,
    Table,
    StaticWebsite,
}

impl DataPlaneService {
    pub const ALL: [DataPlaneService; 5] = [
        DataPlaneService::Blob,
        DataPlaneService::Queue,
        DataPlaneService::File,
        DataPlaneService::Table,
        DataPlaneService::StaticWebsite,
    ];

    /// Whether the account's kind/tier/replication offers this service
    pub fn supported_by(&self, account: &AccountDetails) -> bool {
        let level = account.support_level();
        match self {
            DataPlaneService::Blob => level.blob,
            DataPlaneService::Queue => level.queue,
            DataPlaneService::File => level.share,
            DataPlaneService::Table => level.table,
            DataPlaneService::StaticWebsite => level.static_website,
        }
    }

    /// Primary endpoint of this service, if the account reports one
    pub fn endpoint<'a>(&self, account: &'a AccountDetails) -> Option<&'a str> {
        let endpoints = &account.endpoints;
        match self {
            DataPlaneService::Blob => endpoints.blob.as_deref(),
            DataPlaneService::Queue => endpoints.queue.as_deref(),
            DataPlaneService::File => endpoints.file.as_deref(),
            DataPlaneService::Table => endpoints.table.as_deref(),
            // Static website properties are served by the blob endpoint
            DataPlaneService::StaticWebsite => endpoints.blob.as_deref(),
        }
    }
}

impl std::fmt::Display for DataPlaneService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataPlaneService::Blob => write!(f, "blob"),
            DataPlaneService::Queue => write!(f, "queue"),
            DataPlaneService::File => write!(f, "file"),
            DataPlaneService::Table => write!(f, "table"),
            DataPlaneService::StaticWebsite => write!(f, "static website"),
        }
    }
}

/// One readiness check against a data-plane endpoint
#[async_trait]
pub trait DataPlaneProber: Send + Sync {
    async fn probe_endpoint(&self, service: DataPlaneService, endpoint: &str) -> Result<ProbeStatus>;
}

/// Probes `GET {endpoint}?restype=service&comp=properties`
///
/// Any answer other than 404 or 5xx means the endpoint is serving, even an
/// authorization failure. DNS, connect and timeout errors are transient.
pub struct HttpDataPlaneProber {
    client: reqwest::Client,
}

impl HttpDataPlaneProber {
    pub fn new() -> std::result::Result<Self, crate::StorageError> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DataPlaneProber for HttpDataPlaneProber {
    async fn probe_endpoint(&self, service: DataPlaneService, endpoint: &str) -> Result<ProbeStatus> {
        let response = self
            .client
            .get(endpoint)
            .query(&[("restype", "service"), ("comp", "properties")])
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status();
                tracing::debug!("{} endpoint {} answered {}", service, endpoint, status);
                if status.as_u16() == 404 || status.is_server_error() {
                    Ok(ProbeStatus::pending())
                } else {
                    Ok(ProbeStatus::Ready)
                }
            }
            Err(e) if e.is_connect() || e.is_timeout() || e.is_request() => Err(
                CloudError::TransientConnectivity(format!("{} endpoint {}: {}", service, endpoint, e)),
            ),
            Err(e) => Err(CloudError::ApiError(format!(
                "probing {} endpoint {}: {}",
                service, endpoint, e
            ))),
        }
    }
}

/// [`Probe`] for one service endpoint of one account
pub struct ServiceProbe {
    prober: Arc<dyn DataPlaneProber>,
    service: DataPlaneService,
    endpoint: String,
    account: String,
}

impl ServiceProbe {
    pub fn new(
        prober: Arc<dyn DataPlaneProber>,
        service: DataPlaneService,
        account: &AccountDetails,
    ) -> Result<Self> {
        let endpoint = service.endpoint(account).ok_or_else(|| {
            CloudError::ApiError(format!(
                "{} reports no {} endpoint",
                account.id.name, service
            ))
        })?;
        Ok(Self {
            prober,
            service,
            endpoint: endpoint.to_string(),
            account: account.id.name.clone(),
        })
    }
}

#[async_trait]
impl Probe for ServiceProbe {
    fn describe(&self) -> String {
        format!("{} endpoint of {}", self.service, self.account)
    }

    async fn probe(&self) -> Result<ProbeStatus> {
        self.prober.probe_endpoint(self.service, &self.endpoint).await
    }
}

/// Wait until one service endpoint of `account` is reachable
pub async fn wait_for_service(
    ctx: &OperationContext,
    prober: Arc<dyn DataPlaneProber>,
    config: &PollerConfig,
    account: &AccountDetails,
    service: DataPlaneService,
) -> Result<PollReport> {
    let probe = ServiceProbe::new(prober, service, account)?;
    tracing::debug!("Waiting for {}", probe.describe());
    Poller::new(probe, config.clone()).poll_until_done(ctx).await
}

/// Wait for every data-plane service `account` supports
///
/// Returns the services that were waited on; empty when the data plane is
/// disabled for this provider.
pub async fn wait_for_data_plane(
    ctx: &OperationContext,
    prober: Arc<dyn DataPlaneProber>,
    config: &PollerConfig,
    account: &AccountDetails,
    data_plane_available: bool,
) -> Result<Vec<DataPlaneService>> {
    if !data_plane_available {
        tracing::debug!(
            "Data plane disabled, not waiting on endpoints of {}",
            account.id.name
        );
        return Ok(Vec::new());
    }

    let mut ready = Vec::new();
    for service in DataPlaneService::ALL {
        if !service.supported_by(account) || service.endpoint(account).is_none() {
            continue;
        }
        // Static website shares the blob endpoint
        if service == DataPlaneService::StaticWebsite && ready.contains(&DataPlaneService::Blob) {
            ready.push(service);
            continue;
        }
        wait_for_service(ctx, prober.clone(), config, account, service).await?;
        ready.push(service);
    }
    Ok(ready)
}

/// Handle to an account's data plane, only obtainable after its endpoints
/// answered
#[derive(Debug, Clone)]
pub struct DataPlaneClient {
    account: AccountDetails,
    services: Vec<DataPlaneService>,
}

impl DataPlaneClient {
    pub async fn connect(
        ctx: &OperationContext,
        prober: Arc<dyn DataPlaneProber>,
        config: &PollerConfig,
        account: AccountDetails,
        data_plane_available: bool,
    ) -> Result<Self> {
        if !data_plane_available {
            return Err(CloudError::InvalidConfig(format!(
                "data plane access is disabled; cannot reach {}",
                account.id.name
            )));
        }
        let services = wait_for_data_plane(ctx, prober, config, &account, true).await?;
        Ok(Self { account, services })
    }

    pub fn account(&self) -> &AccountDetails {
        &self.account
    }

    pub fn services(&self) -> &[DataPlaneService] {
        &self.services
    }

    /// Endpoint of a service that was confirmed reachable
    pub fn endpoint(&self, service: DataPlaneService) -> Option<&str> {
        if self.services.contains(&service) {
            service.endpoint(&self.account)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::ScriptedProber;
    use crate::ids::StorageAccountId;
    use crate::models::{AccountKind, Endpoints, SkuTier};

    fn account(kind: AccountKind, tier: SkuTier) -> AccountDetails {
        AccountDetails {
            id: StorageAccountId::new("0000", "rg1", "acct1"),
            kind,
            tier,
            replication: "LRS".to_string(),
            endpoints: Endpoints {
                blob: Some("https://acct1.blob.example/".into()),
                queue: Some("https://acct1.queue.example/".into()),
                table: Some("https://acct1.table.example/".into()),
                file: Some("https://acct1.file.example/".into()),
                web: None,
            },
        }
    }

    fn fast() -> PollerConfig {
        PollerConfig {
            initial_delay: Duration::from_secs(1),
            poll_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(1),
            ..PollerConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_on_supported_services_only() {
        let prober = Arc::new(ScriptedProber::ready());
        let details = account(AccountKind::BlockBlobStorage, SkuTier::Premium);

        let ready = wait_for_data_plane(
            &OperationContext::background(),
            prober.clone(),
            &fast(),
            &details,
            true,
        )
        .await
        .unwrap();

        assert_eq!(
            ready,
            vec![DataPlaneService::Blob, DataPlaneService::StaticWebsite]
        );
        assert_eq!(prober.calls(DataPlaneService::Blob), 1);
        assert_eq!(prober.calls(DataPlaneService::File), 0);
        assert_eq!(prober.calls(DataPlaneService::StaticWebsite), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_data_plane_skips_probes() {
        let prober = Arc::new(ScriptedProber::ready());
        let details = account(AccountKind::StorageV2, SkuTier::Standard);

        let ready = wait_for_data_plane(
            &OperationContext::background(),
            prober.clone(),
            &fast(),
            &details,
            false,
        )
        .await
        .unwrap();

        assert!(ready.is_empty());
        assert_eq!(prober.total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_only_exposes_confirmed_endpoints() {
        let prober = Arc::new(ScriptedProber::ready());
        prober.script(
            DataPlaneService::File,
            vec![Ok(ProbeStatus::pending()), Ok(ProbeStatus::Ready)],
        );
        let details = account(AccountKind::StorageV2, SkuTier::Standard);

        let client = DataPlaneClient::connect(
            &OperationContext::background(),
            prober.clone(),
            &fast(),
            details,
            true,
        )
        .await
        .unwrap();

        assert_eq!(client.endpoint(DataPlaneService::File), Some("https://acct1.file.example/"));
        assert_eq!(prober.calls(DataPlaneService::File), 2);
        assert_eq!(client.services().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_endpoint_fails_after_tolerance() {
        let prober = Arc::new(ScriptedProber::ready());
        prober.script(
            DataPlaneService::File,
            vec![Err(CloudError::TransientConnectivity("dns".into()))],
        );
        let details = account(AccountKind::FileStorage, SkuTier::Premium);

        let err = wait_for_service(
            &OperationContext::background(),
            prober.clone(),
            &fast(),
            &details,
            DataPlaneService::File,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CloudError::PollingFailed { attempts: 4, .. }));
        assert_eq!(prober.calls(DataPlaneService::File), 4);
    }
}

use std::sync::Arc;

use tracing::info;

use greenafrica_billing::AirtimeBilling;
use greenafrica_ledger::{LedgerGateway, MockLedger};
use greenafrica_mirror::MirrorStore;
use greenafrica_registry::RegistryGateway;
use greenafrica_settings::Settings;

use crate::{Result, StepFailure};

/// Collaborators shared by [`crate::PointsLedger`] and [`crate::AccountService`]
#[derive(Clone)]
pub struct Gateways {
    pub ledger: Arc<LedgerGateway>,
    pub registry: Arc<RegistryGateway>,
    pub billing: Arc<dyn AirtimeBilling>,
    pub mirror: Arc<dyn MirrorStore>,
}

impl Gateways {
    pub fn new(
        ledger: Arc<LedgerGateway>,
        registry: Arc<RegistryGateway>,
        billing: Arc<dyn AirtimeBilling>,
        mirror: Arc<dyn MirrorStore>,
    ) -> Self {
        Self {
            ledger,
            registry,
            billing,
            mirror,
        }
    }

    /// Build every gateway from settings. The registry shares the ledger's
    /// RPC connection. In mock ledger mode the [`MockLedger`] is returned too.
    pub fn from_settings(settings: &Settings) -> Result<(Self, Option<MockLedger>)> {
        let (ledger, mock) =
            LedgerGateway::from_settings(&settings.ledger).map_err(StepFailure::from)?;
        let registry = RegistryGateway::new(ledger.submitter().clone(), &settings.registry);
        let billing = greenafrica_billing::from_settings(&settings.billing, settings.redemption)
            .map_err(StepFailure::from)?;
        let mirror = greenafrica_mirror::from_settings(&settings.mirror).map_err(StepFailure::from)?;

        info!(
            "Gateways ready (network {:?}, ledger {:?}, billing {:?}, registry {})",
            settings.network,
            settings.ledger.mode,
            settings.billing.mode,
            if registry.is_configured() { "on" } else { "off" }
        );

        Ok((
            Self::new(
                Arc::new(ledger),
                Arc::new(registry),
                billing,
                Arc::new(mirror),
            ),
            mock,
        ))
    }
}

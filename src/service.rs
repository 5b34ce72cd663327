//! Service layer wiring the components over one sled instance
use crate::approval::{ApprovalCoordinator, ApprovalPolicy};
use crate::collaborators::{Catalog, Clock, Notifier, Organizations, SystemClock, TracingNotifier};
use crate::config::EngineConfig;
use crate::error::OrderError;
use crate::ledger::OrderLedger;
use crate::report::Reporter;
use crate::store::Store;
use crate::versioner::MealVersioner;
use std::sync::Arc;
use tracing::info;

/// External systems the engine consults. Nothing here is owned by the engine.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn Catalog>,
    pub organizations: Arc<dyn Organizations>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Logs events and reads the system clock.
    pub fn new(catalog: Arc<dyn Catalog>, organizations: Arc<dyn Organizations>) -> Self {
        Self {
            catalog,
            organizations,
            notifier: Arc::new(TracingNotifier),
            clock: Arc::new(SystemClock),
        }
    }
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

pub struct CateringService {
    store: Store,
    versioner: MealVersioner,
    ledger: OrderLedger,
    approvals: ApprovalCoordinator,
    reporter: Reporter,
}

impl CateringService {
    pub fn new(
        instance: Arc<sled::Db>,
        collaborators: Collaborators,
        policy: ApprovalPolicy,
    ) -> Result<Self, OrderError> {
        let store = Store::new(instance)?;
        let Collaborators {
            catalog,
            organizations,
            notifier,
            clock,
        } = collaborators;

        let versioner =
            MealVersioner::new(store.clone(), catalog, organizations.clone(), clock.clone());
        let ledger = OrderLedger::new(
            store.clone(),
            organizations.clone(),
            notifier,
            clock.clone(),
        );
        let approvals =
            ApprovalCoordinator::new(store.clone(), organizations.clone(), clock, policy);
        let reporter = Reporter::new(store.clone(), organizations, policy);

        Ok(Self {
            versioner,
            ledger,
            approvals,
            reporter,
            store,
        })
    }

    /// Opens the database described by `config` and wires everything on top of it.
    pub fn open(config: &EngineConfig, collaborators: Collaborators) -> anyhow::Result<Self> {
        let db = Arc::new(config.open_db()?);
        info!(path = %config.db_path.display(), "catering order store opened");
        Ok(Self::new(db, collaborators, config.approval_policy())?)
    }

    pub fn versioner(&self) -> &MealVersioner {
        &self.versioner
    }
    pub fn ledger(&self) -> &OrderLedger {
        &self.ledger
    }
    pub fn approvals(&self) -> &ApprovalCoordinator {
        &self.approvals
    }
    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    pub fn flush(&self) -> Result<usize, OrderError> {
        self.store.flush()
    }
}

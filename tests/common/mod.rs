#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use loan_servicing_backend::api::AppState;
use loan_servicing_backend::database::{
    ContractRegistry, InMemoryLoanStore, LoanStore, ScheduleStore,
};
use loan_servicing_backend::domain::{Contract, ContractStatus, ScheduleEntry};
use loan_servicing_backend::events::InMemoryEventBus;
use loan_servicing_backend::payments::error::{PaymentError, PaymentResult};
use loan_servicing_backend::payments::types::{BankAccount, MobileWallet};
use loan_servicing_backend::payments::{
    Destination, GatewayRequest, GatewayResponse, GatewayRouter, PaymentChannel, PaymentGateway,
};
use loan_servicing_backend::services::TransactionCoordinator;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Gateway that answers from a queue of prepared responses and records every
/// request it receives. An empty queue answers `completed`.
pub struct ScriptedGateway {
    channel: PaymentChannel,
    responses: Mutex<VecDeque<GatewayResponse>>,
    lookups: Mutex<VecDeque<GatewayResponse>>,
    requests: Mutex<Vec<GatewayRequest>>,
    delay: Option<Duration>,
    signature: Option<String>,
}

impl ScriptedGateway {
    pub fn new(channel: PaymentChannel) -> Self {
        Self {
            channel,
            responses: Mutex::new(VecDeque::new()),
            lookups: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            delay: None,
            signature: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_signature(mut self, signature: &str) -> Self {
        self.signature = Some(signature.to_string());
        self
    }

    pub fn push(&self, response: GatewayResponse) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn push_lookup(&self, response: GatewayResponse) {
        self.lookups.lock().unwrap().push_back(response);
    }

    pub fn requests(&self) -> Vec<GatewayRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    fn channel(&self) -> PaymentChannel {
        self.channel
    }

    async fn execute(&self, request: &GatewayRequest) -> PaymentResult<GatewayResponse> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.responses.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| {
            GatewayResponse::completed(
                Some(format!("EXT-{}", request.reference)),
                serde_json::json!({}),
            )
        }))
    }

    async fn lookup(&self, reference: &str) -> PaymentResult<GatewayResponse> {
        self.lookups
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| PaymentError::ChannelError {
                channel: self.channel.to_string(),
                message: format!("unknown reference {}", reference),
                provider_code: Some("404".to_string()),
                retryable: false,
            })
    }

    fn verify_callback(&self, _payload: &[u8], signature: Option<&str>) -> PaymentResult<()> {
        match &self.signature {
            Some(expected) if signature != Some(expected.as_str()) => {
                Err(PaymentError::CallbackVerificationError {
                    message: "signature mismatch".to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Everything a flow test needs, wired the way `main` wires it.
pub struct Harness {
    pub store: InMemoryLoanStore,
    pub coordinator: Arc<TransactionCoordinator>,
    pub bus: Arc<InMemoryEventBus>,
    pub bank: Arc<ScriptedGateway>,
    pub mobile: Arc<ScriptedGateway>,
    pub state: AppState,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_gateways(
            ScriptedGateway::new(PaymentChannel::BankTransfer),
            ScriptedGateway::new(PaymentChannel::MobileMoney),
            Duration::from_secs(5),
        )
    }

    pub fn with_gateways(
        bank: ScriptedGateway,
        mobile: ScriptedGateway,
        timeout: Duration,
    ) -> Self {
        let store = InMemoryLoanStore::new();
        let coordinator = Arc::new(TransactionCoordinator::new(Arc::new(store.clone())));
        let bus = Arc::new(InMemoryEventBus::new());
        let bank = Arc::new(bank);
        let mobile = Arc::new(mobile);
        let router = GatewayRouter::new(timeout)
            .with_gateway(bank.clone())
            .with_gateway(mobile.clone());
        let state = AppState::new(coordinator.clone(), router, bus.clone());
        Self {
            store,
            coordinator,
            bus,
            bank,
            mobile,
            state,
        }
    }

    /// Active contract whose schedule has `installments` monthly entries of
    /// `principal` plus `interest`, due on the 28th from January 2026.
    pub async fn active_contract(
        &self,
        installments: i32,
        principal: Decimal,
        interest: Decimal,
    ) -> (Contract, Vec<ScheduleEntry>) {
        let contract = Contract::new(
            "CTR-TEST",
            principal * Decimal::from(installments),
            dec!(0.10),
            installments,
            "KES",
        )
        .with_status(ContractStatus::Active);
        let schedule: Vec<ScheduleEntry> = (1..=installments)
            .map(|n| ScheduleEntry::new(contract.id, n, due_date(n), principal, interest))
            .collect();
        self.seed(&contract, &schedule).await;
        (contract, schedule)
    }

    /// The three-installment contract used across the flow tests: each entry
    /// totals 1000, split 600 principal and 400 interest.
    pub async fn standard_contract(&self) -> (Contract, Vec<ScheduleEntry>) {
        self.active_contract(3, dec!(600), dec!(400)).await
    }

    /// Draft contract without a schedule, ready for disbursement.
    pub async fn draft_contract(&self, principal: Decimal) -> Contract {
        let contract = Contract::new("CTR-DRAFT", principal, dec!(0.10), 12, "KES");
        self.seed(&contract, &[]).await;
        contract
    }

    pub async fn seed(&self, contract: &Contract, schedule: &[ScheduleEntry]) {
        let mut uow = self.store.begin(None).await.unwrap();
        uow.insert_contract(contract).await.unwrap();
        if !schedule.is_empty() {
            uow.insert_schedule(schedule).await.unwrap();
        }
        uow.commit().await.unwrap();
    }

    pub async fn event_types(&self) -> Vec<String> {
        self.store
            .outbox()
            .await
            .into_iter()
            .map(|record| record.event.event_type)
            .collect()
    }
}

pub fn due_date(installment: i32) -> NaiveDate {
    let month = ((installment - 1) % 12 + 1) as u32;
    let year = 2026 + (installment - 1) / 12;
    NaiveDate::from_ymd_opt(year, month, 28).unwrap()
}

pub fn wallet() -> Destination {
    Destination::MobileWallet(MobileWallet {
        phone_number: "+254712345678".to_string(),
        operator: "mpesa".to_string(),
    })
}

pub fn bank_account() -> Destination {
    Destination::BankAccount(BankAccount {
        account_number: "0123456789".to_string(),
        account_name: Some("Jane Borrower".to_string()),
        bank_code: Some("058".to_string()),
        bank_name: None,
    })
}

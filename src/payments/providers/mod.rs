pub mod bank_transfer;
pub mod mobile_money;

pub use bank_transfer::BankTransferGateway;
pub use mobile_money::MobileMoneyGateway;

pub mod checkout;
pub mod declare;
pub mod status;
pub mod sweep;

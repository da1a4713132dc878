pub mod lead;
pub mod ledger;

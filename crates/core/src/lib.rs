//! # ShonaliChain Core
//!
//! Core types, events, constants, and errors for the ShonaliChain batch
//! custody and escrow ledger.
//!
//! This crate provides the fundamental building blocks used across all
//! ledger components, ensuring every crate speaks the same domain language:
//!
//! - **Identity**: handlers are wallet addresses (Alloy `Address`)
//! - **Domain types**: Role, CropType, BatchStatus, Batch, CustodyEvent, EscrowRecord
//! - **Events**: the append-only `LedgerEvent` union the EventLog stores
//! - **Errors**: the closed `LedgerError` taxonomy every operation returns

#![warn(missing_docs)]

pub mod constants;
pub mod error;
pub mod event;
pub mod types;

// Re-export commonly used items
pub use constants::*;
pub use error::{LedgerError, Result};
pub use event::{LedgerEvent, SequencedEvent};
pub use types::*;

// Re-export the identity primitive for convenience
pub use alloy_primitives::Address;

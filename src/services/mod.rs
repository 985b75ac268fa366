//! Business logic services
//!
//! This module contains the hotspot logic separated from HTTP concerns:
//! access grants and their expiry, payment notification decoding and router
//! provisioning.

pub mod access;
pub mod grant_store;
pub mod notification_ledger;
pub mod payment;
pub mod provisioning;

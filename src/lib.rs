//! Pre-warmed rotating identifier pools for fast media delivery.
//!
//! Media is uploaded once to a messaging transport ahead of time; afterwards
//! every send reuses one of the transport-issued identifiers instead of
//! re-uploading the bytes. See [`cache::MediaDeliveryCache`] for the
//! foreground path and [`maintenance`] for the background tasks that keep the
//! pools full and valid.

pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod maintenance;
pub mod media;
pub mod storage;

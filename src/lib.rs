//! Provider-agnostic integration core—auth lifecycle, signed provider operations,
//! schema synchronization, and a transactional lifecycle outbox for multi-tenant services.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod activity;
pub mod config;
pub mod domain;
pub mod error;
pub mod flows;
pub mod ledger;
pub mod mapping;
pub mod obs;
pub mod outbox;
pub mod provider;
pub mod resolve;
pub mod runtime;
pub mod secret;
pub mod signer;
pub mod store;
pub mod sync;
pub mod transport;

mod _prelude {
	pub use std::{
		collections::{BTreeMap, BTreeSet, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		hash::{Hash, Hasher},
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use serde::{Deserialize, Serialize};
	pub use serde_json::Value as Json;
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Result, ServiceError};
}

pub use url;

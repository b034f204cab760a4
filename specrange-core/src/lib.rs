//! specrange-core: Range selection state for spectrum imaging.
//!
//! This crate provides the calibration between channel index and energy,
//! the fixed-capacity range registry, and the owned selection session that
//! publishes immutable snapshots to any number of consumers.
//!

pub mod broadcast;
pub mod calibration;
pub mod context;
pub mod error;
pub mod lines;
pub mod range;
pub mod registry;
pub mod service;
pub mod session;

pub use broadcast::{SelectionBroadcaster, SelectionChange, SelectionUpdate, SubscriberId};
pub use calibration::{CalibrationConverter, CalibrationParameters};
pub use context::{DatasetContext, DatasetRef};
pub use error::{CapacityError, DomainError, Error, NotFoundError, Result};
pub use lines::{LineName, ReferenceElement};
pub use range::{EnergySpan, IndexSpan, RangeBounds, RangeEntry, RangeId, RangeRequest, ResolvedBounds};
pub use registry::{NewRange, RangeRegistry, RegistrySnapshot};
pub use service::{DataService, Matrix, ServiceError};
pub use session::{Deferred, DeferredFailure, SelectionSession, SessionCommand};

//! collector-calc - sandboxed formula evaluation for virtual points and
//! alarm scripts.
//!
//! `evalexpr` stands in for the "JavaScript-style interpreter" called for
//! by the runtime: it has no I/O, filesystem, or network access by
//! construction, supports the arithmetic/comparison/logic surface a
//! formula needs, and every evaluation runs against a fresh context, so
//! calls are naturally reentrant and isolated from one another.
//!
//! # Example
//!
//! ```rust
//! use collector_calc::{CalcEngine, MemoryStateStore};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! # let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
//! # rt.block_on(async {
//! let store = Arc::new(MemoryStateStore::new());
//! let engine = CalcEngine::new(store, "vp_1");
//!
//! let mut vars = HashMap::new();
//! vars.insert("z1".to_string(), 24.0);
//! vars.insert("z2".to_string(), 26.0);
//! vars.insert("amb".to_string(), 25.0);
//!
//! let result = engine
//!     .evaluate("(z1+z2+amb)/3", &vars, &HashMap::new(), std::time::Duration::from_secs(5))
//!     .await
//!     .unwrap();
//! assert_eq!(result, 25.0);
//! # });
//! ```

pub mod builtin_functions;
pub mod dag;
pub mod sandbox;
pub mod state;

pub use builtin_functions::{abs, clamp, max, min, round, scale, sign};
pub use dag::{DependencyGraph, GraphError};
pub use sandbox::CalcEngine;
pub use state::{MemoryStateStore, NullStateStore, StateStore};

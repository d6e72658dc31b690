//! buildchain-lib: declarative build-item dependency graphs and their concurrent execution
//!
//! Independently written build steps declare which typed items they consume
//! and produce. This crate provides:
//! - `BuildItem`: simple, multi and empty item types
//! - `BuildStep`: step declarations with required, optional and ordering-only dependencies
//! - `BuildChain`: validation and wiring of steps into a dependency graph
//! - execution on a bounded worker pool with failure propagation
//! - `BuildResult`: every item produced by a successful build
//!
//! # Example
//!
//! ```
//! use buildchain_lib::prelude::*;
//!
//! struct Name(String);
//! impl BuildItem for Name {
//!   const KIND: ItemKind = ItemKind::Simple;
//! }
//!
//! struct Greeting(String);
//! impl BuildItem for Greeting {
//!   const KIND: ItemKind = ItemKind::Simple;
//! }
//!
//! let mut builder = BuildChain::builder();
//! builder.add_initial::<Name>().add_step(
//!   BuildStep::new("greet")
//!     .consumes::<Name>()
//!     .produces::<Greeting>()
//!     .run(|ctx| {
//!       let name = ctx.consume::<Name>()?.0.clone();
//!       ctx.produce(Greeting(format!("hello {name}")))?;
//!       Ok(())
//!     }),
//! );
//! let chain = builder.build().unwrap();
//!
//! let result = chain
//!   .execute_blocking(Seeds::new().with(Name("world".into())), &ExecuteConfig::default())
//!   .unwrap();
//! assert_eq!(result.get::<Greeting>().unwrap().0, "hello world");
//! ```

pub mod chain;
pub mod consts;
pub mod diagnostic;
pub mod execute;
pub mod item;
pub mod provider;
pub mod result;
pub mod step;
pub mod store;

/// The types needed to declare, build and run a chain.
pub mod prelude {
  pub use crate::chain::{BuildChain, BuildChainBuilder, ChainBuildError};
  pub use crate::diagnostic::{Diagnostic, Level};
  pub use crate::execute::context::StepContext;
  pub use crate::execute::{BuildFailure, ExecuteConfig, FatalError, Seeds};
  pub use crate::item::{BuildItem, ItemKind};
  pub use crate::provider::BuildProvider;
  pub use crate::result::{BuildResult, Closeable};
  pub use crate::step::{BuildStep, ProduceFlag};
}

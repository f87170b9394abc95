//! Single-settlement promises with chained continuations.
//!
//! A [`Promise`] settles at most once, to a value or a rejection reason.
//! Settlement and every continuation run on the thread's microtask queue (see
//! [`event_loop`]), never synchronously, so callback order stays
//! deterministic. Promises resolved with other promises adopt their outcome,
//! and a rejection that nothing observes surfaces from the event loop as an
//! [`UncaughtRejection`].
//!
//! # Examples
//!
//! ```
//! use promise_chain::{event_loop, Promise};
//!
//! let total = Promise::<i32, String>::all([
//!     Promise::resolve(1),
//!     Promise::<i32, String>::resolve(2).then(|n| Ok(n * 10)),
//! ])
//! .then(|values| Ok(values.iter().sum::<i32>()))
//! .catch(|_| Ok(0));
//!
//! assert_eq!(event_loop::block_on(&total).unwrap(), Ok(21));
//! ```
pub mod combinators;
pub mod error;
pub mod event_loop;
pub mod promise;
pub mod waiter;

pub use combinators::Settled;
pub use error::{AggregateError, PromiseError, UncaughtRejection};
pub use event_loop::{EventLoopConfig, RunReport, TimerId, UnhandledPolicy};
pub use promise::{Outcome, Promise, PromiseState, Resolver};
pub use waiter::Waiter;

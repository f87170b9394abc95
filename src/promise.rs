use std::cell::{Cell, RefCell};
use std::fmt;
use std::mem;
use std::rc::Rc;

use crate::error::{PromiseError, UncaughtRejection};
use crate::event_loop;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

impl PromiseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromiseState::Pending => "pending",
            PromiseState::Fulfilled => "fulfilled",
            PromiseState::Rejected => "rejected",
        }
    }
}

impl fmt::Display for PromiseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a promise resolves with: a plain value, or another promise whose
/// eventual outcome gets adopted.
#[derive(Debug)]
pub enum Outcome<T, E> {
    Value(T),
    Deferred(Promise<T, E>),
}

impl<T, E> From<T> for Outcome<T, E> {
    fn from(value: T) -> Self {
        Outcome::Value(value)
    }
}

type Reaction<X> = Box<dyn FnOnce(X)>;

enum State<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

impl<T, E> State<T, E> {
    fn kind(&self) -> PromiseState {
        match self {
            State::Pending => PromiseState::Pending,
            State::Fulfilled(_) => PromiseState::Fulfilled,
            State::Rejected(_) => PromiseState::Rejected,
        }
    }
}

struct Inner<T, E> {
    state: State<T, E>,
    on_fulfilled: Vec<Reaction<T>>,
    on_rejected: Vec<Reaction<E>>,
}

enum Settlement<T, E> {
    Fulfill(T),
    Reject(E),
    Adopt(Promise<T, E>),
}

/// A value that becomes available later, exactly once.
///
/// A `Promise` is a cheap handle; clones observe the same settlement. Every
/// settlement and every reaction to an already settled promise goes through
/// the thread's [`event_loop`], so continuations never run synchronously.
///
/// # Examples
///
/// ```
/// use promise_chain::{event_loop, Promise};
///
/// let greeting = Promise::<String, String>::new(|resolver| {
///     resolver.fulfill("hello".into());
///     Ok(())
/// })
/// .then(|word| Ok(format!("{word}, world")));
///
/// assert_eq!(
///     event_loop::block_on(&greeting).unwrap(),
///     Ok("hello, world".to_string())
/// );
/// ```
pub struct Promise<T, E> {
    inner: Rc<RefCell<Inner<T, E>>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("Promise")
                .field("state", &inner.state.kind())
                .finish(),
            Err(_) => f.debug_struct("Promise").finish_non_exhaustive(),
        }
    }
}

impl<T, E> Promise<T, E> {
    pub fn state(&self) -> PromiseState {
        self.inner.borrow().state.kind()
    }

    pub fn is_pending(&self) -> bool {
        self.state() == PromiseState::Pending
    }

    fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    /// Runs `resolver` right away with the settlement handle of the new
    /// promise. Returning `Err` rejects the promise with that reason.
    pub fn new<F>(resolver: F) -> Self
    where
        F: FnOnce(Resolver<T, E>) -> Result<(), E>,
    {
        let (promise, settle) = Self::with_resolver();
        if let Err(reason) = resolver(settle.clone()) {
            tracing::trace!(?reason, "resolver failed, rejecting");
            settle.reject(reason);
        }
        promise
    }

    /// Like [`Promise::new`] for hosts whose resolver slot may be empty.
    ///
    /// ```
    /// use promise_chain::{Promise, PromiseError};
    ///
    /// let missing = Promise::<i32, String>::try_new(None);
    /// assert!(matches!(missing, Err(PromiseError::ResolverNotCallable)));
    /// ```
    pub fn try_new(
        resolver: Option<Box<dyn FnOnce(Resolver<T, E>) -> Result<(), E>>>,
    ) -> Result<Self, PromiseError> {
        match resolver {
            Some(resolver) => Ok(Self::new(resolver)),
            None => Err(PromiseError::ResolverNotCallable),
        }
    }

    /// A pending promise together with the handle that settles it.
    pub fn with_resolver() -> (Self, Resolver<T, E>) {
        let promise = Self {
            inner: Rc::new(RefCell::new(Inner {
                state: State::Pending,
                on_fulfilled: Vec::new(),
                on_rejected: Vec::new(),
            })),
        };
        let resolver = Resolver {
            promise: promise.clone(),
        };
        (promise, resolver)
    }

    /// The settled outcome, `None` while pending.
    pub fn result(&self) -> Option<Result<T, E>> {
        match &self.inner.borrow().state {
            State::Pending => None,
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(reason) => Some(Err(reason.clone())),
        }
    }

    /// The general form of chaining. Each handler either produces the next
    /// outcome, which may be a promise to adopt, or fails with the reason the
    /// returned promise rejects with.
    pub fn then_with<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Outcome<U, E>, E> + 'static,
        R: FnOnce(E) -> Result<Outcome<U, E>, E> + 'static,
    {
        let (next, resolver) = Promise::<U, E>::with_resolver();
        let rejecter = resolver.clone();
        self.subscribe(
            move |value| resolver.complete(on_fulfilled(value)),
            move |reason| rejecter.complete(on_rejected(reason)),
        );
        next
    }

    /// Maps the fulfillment value. Rejections pass through untouched.
    pub fn then<U, F>(&self, on_fulfilled: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<U, E> + 'static,
    {
        self.then_with(move |value| on_fulfilled(value).map(Outcome::Value), Err)
    }

    pub fn then_else<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<U, E> + 'static,
        R: FnOnce(E) -> Result<U, E> + 'static,
    {
        self.then_with(
            move |value| on_fulfilled(value).map(Outcome::Value),
            move |reason| on_rejected(reason).map(Outcome::Value),
        )
    }

    /// Chains a step that is itself asynchronous; its promise is flattened.
    pub fn and_then<U, F>(&self, on_fulfilled: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Promise<U, E> + 'static,
    {
        self.then_with(move |value| Ok(Outcome::Deferred(on_fulfilled(value))), Err)
    }

    /// Recovers from a rejection. Fulfillment values pass through untouched.
    pub fn catch<F>(&self, on_rejected: F) -> Promise<T, E>
    where
        F: FnOnce(E) -> Result<T, E> + 'static,
    {
        self.then_with(
            |value| Ok(Outcome::Value(value)),
            move |reason| on_rejected(reason).map(Outcome::Value),
        )
    }

    pub fn or_else<F>(&self, on_rejected: F) -> Promise<T, E>
    where
        F: FnOnce(E) -> Promise<T, E> + 'static,
    {
        self.then_with(
            |value| Ok(Outcome::Value(value)),
            move |reason| Ok(Outcome::Deferred(on_rejected(reason))),
        )
    }

    /// Runs `on_settled` on either outcome and keeps that outcome, unless
    /// `on_settled` fails, in which case its reason replaces it.
    pub fn finally<F>(&self, on_settled: F) -> Promise<T, E>
    where
        F: FnOnce() -> Result<(), E> + 'static,
    {
        let on_fulfilled = Rc::new(Cell::new(Some(on_settled)));
        let on_rejected = on_fulfilled.clone();
        self.then_with(
            move |value| {
                run_once(&on_fulfilled)?;
                Ok(Outcome::Value(value))
            },
            move |reason| {
                run_once(&on_rejected)?;
                Err(reason)
            },
        )
    }

    /// Registers raw reactions. If the promise already settled, a drain is
    /// queued so the new reactions still run asynchronously.
    pub(crate) fn subscribe<F, R>(&self, on_fulfilled: F, on_rejected: R)
    where
        F: FnOnce(T) + 'static,
        R: FnOnce(E) + 'static,
    {
        let settled = {
            let mut inner = self.inner.borrow_mut();
            inner.on_fulfilled.push(Box::new(on_fulfilled));
            inner.on_rejected.push(Box::new(on_rejected));
            !matches!(inner.state, State::Pending)
        };
        if settled {
            let promise = self.clone();
            event_loop::schedule(Box::new(move || {
                promise.drain();
                Ok(())
            }));
        }
    }

    /// Body of the microtask queued by every [`Resolver`] call.
    fn settle(&self, settlement: Settlement<T, E>) -> Result<(), UncaughtRejection> {
        let mut inner = self.inner.borrow_mut();
        if !matches!(inner.state, State::Pending) {
            tracing::trace!(state = %inner.state.kind(), "already settled, ignoring");
            return Ok(());
        }
        match settlement {
            Settlement::Adopt(other) => {
                drop(inner);
                self.follow(other);
                return Ok(());
            }
            Settlement::Fulfill(value) => {
                inner.state = State::Fulfilled(value);
                tracing::trace!("promise fulfilled");
            }
            Settlement::Reject(reason) => {
                if inner.on_rejected.is_empty() {
                    // Nothing can observe this rejection any more. Record it
                    // so late reactions still see it, then report it.
                    inner.state = State::Rejected(reason.clone());
                    return Err(UncaughtRejection::new(reason));
                }
                tracing::trace!(?reason, "promise rejected");
                inner.state = State::Rejected(reason);
            }
        }
        drop(inner);
        self.drain();
        Ok(())
    }

    /// Settles this promise the way `other` eventually settles.
    fn follow(&self, other: Promise<T, E>) {
        if self.ptr_eq(&other) {
            tracing::warn!("promise resolved with itself, it will never settle");
            return;
        }
        tracing::debug!(inner = ?other, "adopting the outcome of another promise");
        let fulfill = Resolver {
            promise: self.clone(),
        };
        let reject = fulfill.clone();
        other.subscribe(
            move |value| fulfill.fulfill(value),
            move |reason| reject.reject(reason),
        );
    }

    /// Runs and clears the reactions matching the settled state.
    fn drain(&self) {
        let (on_fulfilled, on_rejected, state) = {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            let state = match &inner.state {
                State::Pending => return,
                State::Fulfilled(value) => State::Fulfilled(value.clone()),
                State::Rejected(reason) => State::Rejected(reason.clone()),
            };
            (
                mem::take(&mut inner.on_fulfilled),
                mem::take(&mut inner.on_rejected),
                state,
            )
        };
        match state {
            State::Pending => {}
            State::Fulfilled(value) => {
                drop(on_rejected);
                for reaction in on_fulfilled {
                    reaction(value.clone());
                }
            }
            State::Rejected(reason) => {
                drop(on_fulfilled);
                for reaction in on_rejected {
                    reaction(reason.clone());
                }
            }
        }
    }
}

fn run_once<F, E>(slot: &Cell<Option<F>>) -> Result<(), E>
where
    F: FnOnce() -> Result<(), E>,
{
    match slot.take() {
        Some(on_settled) => on_settled(),
        None => Ok(()),
    }
}

/// The settlement side of a [`Promise`].
///
/// Clones settle the same promise. Nothing settles synchronously: each call
/// queues a microtask, and the first one to run against a pending promise
/// wins.
pub struct Resolver<T, E> {
    promise: Promise<T, E>,
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("promise", &self.promise)
            .finish()
    }
}

impl<T, E> Resolver<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    pub fn fulfill(&self, value: T) {
        self.schedule(Settlement::Fulfill(value));
    }

    /// Rejects with `reason`. If no reaction is registered on the promise by
    /// the time the rejection lands, the event loop reports it as uncaught.
    pub fn reject(&self, reason: E) {
        self.schedule(Settlement::Reject(reason));
    }

    pub fn resolve(&self, outcome: Outcome<T, E>) {
        match outcome {
            Outcome::Value(value) => self.fulfill(value),
            Outcome::Deferred(promise) => self.adopt(promise),
        }
    }

    /// Settles with whatever `promise` eventually settles with.
    pub fn adopt(&self, promise: Promise<T, E>) {
        self.schedule(Settlement::Adopt(promise));
    }

    /// Rejecting with a promise adopts its outcome, same as [`Resolver::adopt`].
    /// A fulfilled `promise` therefore fulfills this one.
    pub fn reject_adopting(&self, promise: Promise<T, E>) {
        self.schedule(Settlement::Adopt(promise));
    }

    pub(crate) fn complete(&self, result: Result<Outcome<T, E>, E>) {
        match result {
            Ok(outcome) => self.resolve(outcome),
            Err(reason) => self.reject(reason),
        }
    }

    fn schedule(&self, settlement: Settlement<T, E>) {
        let promise = self.promise.clone();
        event_loop::schedule(Box::new(move || promise.settle(settlement)));
    }
}

use std::cell::RefCell;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::Promise;

/// A [`Promise`] seen as a `std::future::Future`.
///
/// The waiter only observes the promise; something still has to drive the
/// [`event_loop`](crate::event_loop) for the promise to settle.
///
/// # Examples
///
/// ```
/// use futures::executor::block_on;
/// use promise_chain::{event_loop, Promise};
/// use std::future::IntoFuture;
///
/// let waiter = Promise::<&str, ()>::resolve("🍓").into_future();
/// event_loop::run().unwrap();
/// assert_eq!(block_on(waiter), Ok("🍓"));
/// ```
pub struct Waiter<T, E> {
    slot: Rc<RefCell<Slot<T, E>>>,
}

struct Slot<T, E> {
    value: Option<Result<T, E>>,
    waker: Option<Waker>,
}

impl<T, E> Slot<T, E> {
    fn deliver(slot: &RefCell<Self>, outcome: Result<T, E>) {
        let waker = {
            let mut slot = slot.borrow_mut();
            slot.value = Some(outcome);
            slot.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake()
        }
    }
}

impl<T, E> Waiter<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    pub(crate) fn new(promise: &Promise<T, E>) -> Self {
        let slot = Rc::new(RefCell::new(Slot {
            value: None,
            waker: None,
        }));
        let on_value = slot.clone();
        let on_reason = slot.clone();
        promise.subscribe(
            move |value| Slot::deliver(&on_value, Ok(value)),
            move |reason| Slot::deliver(&on_reason, Err(reason)),
        );
        Self { slot }
    }
}

impl<T, E> Waiter<T, E> {
    /// Takes the outcome without polling, if it already arrived.
    pub fn try_take(&self) -> Option<Result<T, E>> {
        self.slot.borrow_mut().value.take()
    }
}

impl<T, E> fmt::Debug for Waiter<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ready = self
            .slot
            .try_borrow()
            .map(|slot| slot.value.is_some())
            .unwrap_or(false);
        f.debug_struct("Waiter").field("ready", &ready).finish()
    }
}

impl<T, E> Future for Waiter<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.slot.borrow_mut();
        match slot.value.take() {
            Some(outcome) => Poll::Ready(outcome),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T, E> IntoFuture for Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    type Output = Result<T, E>;
    type IntoFuture = Waiter<T, E>;

    fn into_future(self) -> Waiter<T, E> {
        Waiter::new(&self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop;
    use futures::executor::block_on;
    use futures::FutureExt;

    #[test]
    fn test_waiter_resolve() {
        let (promise, resolver) = Promise::<String, ()>::with_resolver();
        let waiter = promise.into_future();
        resolver.fulfill(String::from("🍓"));
        event_loop::run().unwrap();
        assert_eq!(block_on(waiter), Ok(String::from("🍓")));
    }

    #[test]
    fn test_waiter_reject() {
        let waiter = Promise::<(), String>::reject(String::from("reject!!")).into_future();
        event_loop::run().unwrap();
        assert_eq!(block_on(waiter), Err(String::from("reject!!")));
    }

    #[test]
    fn test_waiter_pending_until_loop_runs() {
        let (promise, resolver) = Promise::<u32, ()>::with_resolver();
        let mut waiter = promise.into_future();
        assert_eq!((&mut waiter).now_or_never(), None);

        resolver.fulfill(42);
        assert_eq!((&mut waiter).now_or_never(), None);
        event_loop::run().unwrap();
        assert_eq!(waiter.now_or_never(), Some(Ok(42)));
    }

    #[test]
    fn test_two_waiters_on_one_promise() {
        let promise = Promise::<&str, ()>::resolve("hi");
        let first = promise.clone().into_future();
        let second = promise.into_future();
        event_loop::run().unwrap();
        assert_eq!(block_on(first), Ok("hi"));
        assert_eq!(block_on(second), Ok("hi"));
    }

    #[test]
    fn test_awaiting_inside_async_block() {
        let doubled = Promise::<i32, String>::resolve(21)
            .then(|n| Ok(n * 2))
            .into_future();
        let task = async move { doubled.await.map(|n| n + 1) };
        event_loop::run().unwrap();
        assert_eq!(block_on(task), Ok(43));
    }
}

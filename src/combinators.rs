use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::error::AggregateError;
use crate::promise::{Promise, PromiseState};

/// Per-input outcome produced by [`Promise::all_settled`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled<T, E> {
    Fulfilled { value: T },
    Rejected { reason: E },
}

impl<T, E> Settled<T, E> {
    pub fn status(&self) -> PromiseState {
        match self {
            Settled::Fulfilled { .. } => PromiseState::Fulfilled,
            Settled::Rejected { .. } => PromiseState::Rejected,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Settled::Fulfilled { value } => Some(value),
            Settled::Rejected { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&E> {
        match self {
            Settled::Fulfilled { .. } => None,
            Settled::Rejected { reason } => Some(reason),
        }
    }
}

/// Index-aligned slots that fill up in arrival order.
struct Tally<X> {
    slots: RefCell<Vec<Option<X>>>,
    filled: Cell<usize>,
}

impl<X> Tally<X> {
    fn new(len: usize) -> Rc<Self> {
        Rc::new(Self {
            slots: RefCell::new((0..len).map(|_| None).collect()),
            filled: Cell::new(0),
        })
    }

    /// Stores `item` at `index`. Once every slot is filled, hands back all
    /// items in index order.
    fn record(&self, index: usize, item: X) -> Option<Vec<X>> {
        let mut slots = self.slots.borrow_mut();
        slots[index] = Some(item);
        self.filled.set(self.filled.get() + 1);
        if self.filled.get() < slots.len() {
            return None;
        }
        Some(slots.drain(..).flatten().collect())
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    pub fn resolve(value: T) -> Self {
        Self::new(|resolver| {
            resolver.fulfill(value);
            Ok(())
        })
    }

    pub fn reject(reason: E) -> Self {
        Self::new(|resolver| {
            resolver.reject(reason);
            Ok(())
        })
    }

    /// Fulfills with every value in input order once all inputs fulfill, or
    /// rejects with the first rejection to arrive.
    ///
    /// ```
    /// use promise_chain::{event_loop, Promise};
    ///
    /// let all = Promise::<i32, String>::all([Promise::resolve(1), Promise::resolve(2)]);
    /// assert_eq!(event_loop::block_on(&all).unwrap(), Ok(vec![1, 2]));
    /// ```
    pub fn all<I>(promises: I) -> Promise<Vec<T>, E>
    where
        I: IntoIterator<Item = Promise<T, E>>,
    {
        let promises: Vec<_> = promises.into_iter().collect();
        Promise::new(move |resolver| {
            if promises.is_empty() {
                resolver.fulfill(Vec::new());
                return Ok(());
            }
            let values = Tally::new(promises.len());
            for (index, promise) in promises.iter().enumerate() {
                let values = values.clone();
                let on_value = resolver.clone();
                let on_reason = resolver.clone();
                promise.subscribe(
                    move |value| {
                        if let Some(values) = values.record(index, value) {
                            on_value.fulfill(values);
                        }
                    },
                    move |reason| on_reason.reject(reason),
                );
            }
            Ok(())
        })
    }

    /// Waits for every input and reports each outcome. Never rejects.
    pub fn all_settled<I>(promises: I) -> Promise<Vec<Settled<T, E>>, E>
    where
        I: IntoIterator<Item = Promise<T, E>>,
    {
        let promises: Vec<_> = promises.into_iter().collect();
        Promise::new(move |resolver| {
            if promises.is_empty() {
                resolver.fulfill(Vec::new());
                return Ok(());
            }
            let outcomes = Tally::new(promises.len());
            for (index, promise) in promises.iter().enumerate() {
                let fulfilled = (outcomes.clone(), resolver.clone());
                let rejected = (outcomes.clone(), resolver.clone());
                promise.subscribe(
                    move |value| {
                        let (outcomes, resolver) = fulfilled;
                        if let Some(all) = outcomes.record(index, Settled::Fulfilled { value }) {
                            resolver.fulfill(all);
                        }
                    },
                    move |reason| {
                        let (outcomes, resolver) = rejected;
                        if let Some(all) = outcomes.record(index, Settled::Rejected { reason }) {
                            resolver.fulfill(all);
                        }
                    },
                );
            }
            Ok(())
        })
    }

    /// Settles like whichever input settles first. Stays pending on empty input.
    pub fn race<I>(promises: I) -> Promise<T, E>
    where
        I: IntoIterator<Item = Promise<T, E>>,
    {
        let promises: Vec<_> = promises.into_iter().collect();
        Promise::new(move |resolver| {
            for promise in &promises {
                let on_value = resolver.clone();
                let on_reason = resolver.clone();
                promise.subscribe(
                    move |value| on_value.fulfill(value),
                    move |reason| on_reason.reject(reason),
                );
            }
            Ok(())
        })
    }

    /// Fulfills with the first value to arrive. Rejects with every reason, in
    /// input order, only when all inputs reject.
    ///
    /// ```
    /// use promise_chain::{event_loop, AggregateError, Promise};
    ///
    /// let any = Promise::<(), &str>::any([]);
    /// assert_eq!(
    ///     event_loop::block_on(&any).unwrap(),
    ///     Err(AggregateError::new(vec![]))
    /// );
    /// ```
    pub fn any<I>(promises: I) -> Promise<T, AggregateError<E>>
    where
        I: IntoIterator<Item = Promise<T, E>>,
    {
        let promises: Vec<_> = promises.into_iter().collect();
        Promise::new(move |resolver| {
            if promises.is_empty() {
                resolver.reject(AggregateError::new(Vec::new()));
                return Ok(());
            }
            let reasons = Tally::new(promises.len());
            for (index, promise) in promises.iter().enumerate() {
                let reasons = reasons.clone();
                let on_value = resolver.clone();
                let on_reason = resolver.clone();
                promise.subscribe(
                    move |value| on_value.fulfill(value),
                    move |reason| {
                        if let Some(reasons) = reasons.record(index, reason) {
                            on_reason.reject(AggregateError::new(reasons));
                        }
                    },
                );
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::{block_on, run, set_timeout};
    use crate::Resolver;
    use std::time::Duration;

    fn pending<T, E>() -> (Promise<T, E>, Resolver<T, E>)
    where
        T: Clone + 'static,
        E: Clone + fmt::Debug + 'static,
    {
        Promise::with_resolver()
    }

    fn after<T, E>(ms: u64, outcome: Result<T, E>) -> Promise<T, E>
    where
        T: Clone + 'static,
        E: Clone + fmt::Debug + 'static,
    {
        Promise::new(move |resolver| {
            set_timeout(Duration::from_millis(ms), move || match outcome {
                Ok(value) => resolver.fulfill(value),
                Err(reason) => resolver.reject(reason),
            });
            Ok(())
        })
    }

    #[test]
    fn test_all_keeps_input_order() {
        let all = Promise::<&str, &str>::all([
            after(30, Ok("one")),
            after(10, Ok("two")),
            after(20, Ok("three")),
        ]);
        assert_eq!(block_on(&all).unwrap(), Ok(vec!["one", "two", "three"]));
    }

    #[test]
    fn test_all_rejects_with_first_rejection() {
        let (first, first_resolver) = pending::<i32, &str>();
        let (third, third_resolver) = pending::<i32, &str>();
        let all = Promise::all([first, Promise::reject("second failed"), third]);
        assert_eq!(block_on(&all).unwrap(), Err("second failed"));

        first_resolver.fulfill(1);
        third_resolver.reject("third failed");
        let report = run().unwrap();
        assert!(report.uncaught.is_empty());
        assert_eq!(all.result(), Some(Err("second failed")));
    }

    #[test]
    fn test_all_empty_fulfills_immediately() {
        let all = Promise::<i32, ()>::all(Vec::new());
        assert_eq!(block_on(&all).unwrap(), Ok(vec![]));
    }

    #[test]
    fn test_all_settled_reports_each_outcome() {
        let settled =
            Promise::<i32, &str>::all_settled([Promise::resolve(1), Promise::reject("e")]);
        let outcomes = block_on(&settled).unwrap().unwrap();
        assert_eq!(
            outcomes,
            [
                Settled::Fulfilled { value: 1 },
                Settled::Rejected { reason: "e" }
            ]
        );
        assert_eq!(outcomes[0].status().as_str(), "fulfilled");
        assert_eq!(outcomes[1].status().as_str(), "rejected");
        assert_eq!(outcomes[0].value(), Some(&1));
        assert_eq!(outcomes[1].reason(), Some(&"e"));
    }

    #[test]
    fn test_all_settled_empty() {
        let settled = Promise::<i32, ()>::all_settled([]);
        assert_eq!(block_on(&settled).unwrap(), Ok(vec![]));
    }

    #[test]
    fn test_race_fast_rejection_wins() {
        let race = Promise::race([after(100, Ok("x")), after(10, Err("y"))]);
        assert_eq!(block_on(&race).unwrap(), Err("y"));

        run().unwrap();
        assert_eq!(race.result(), Some(Err("y")));
    }

    #[test]
    fn test_race_fast_fulfillment_wins() {
        let race = Promise::<&str, &str>::race([after(50, Err("slow")), after(5, Ok("quick"))]);
        assert_eq!(block_on(&race).unwrap(), Ok("quick"));
    }

    #[test]
    fn test_race_empty_never_settles() {
        let race = Promise::<i32, ()>::race([]);
        run().unwrap();
        assert!(race.is_pending());
    }

    #[test]
    fn test_any_collects_reasons_in_input_order() {
        let any = Promise::<i32, &str>::any([after(20, Err("a")), after(10, Err("b"))]);
        match block_on(&any).unwrap() {
            Err(aggregate) => {
                assert_eq!(aggregate.errors, ["a", "b"]);
                assert_eq!(aggregate.message, "All promises rejected");
            }
            Ok(value) => panic!("expected an aggregate rejection, got {value}"),
        }
    }

    #[test]
    fn test_any_single_fulfillment_short_circuits() {
        let any = Promise::<i32, &str>::any([
            after(5, Err("a")),
            after(10, Ok(2)),
            after(15, Err("c")),
        ]);
        assert_eq!(block_on(&any).unwrap(), Ok(2));

        let report = run().unwrap();
        assert!(report.uncaught.is_empty());
        assert_eq!(any.result(), Some(Ok(2)));
    }

    #[test]
    fn test_settled_inputs_still_resolve_later() {
        let (ready, resolver) = pending::<u8, ()>();
        resolver.fulfill(9);
        run().unwrap();
        assert_eq!(ready.result(), Some(Ok(9)));

        let all = Promise::all([ready.clone(), ready]);
        assert!(all.is_pending());
        assert_eq!(block_on(&all).unwrap(), Ok(vec![9, 9]));
    }
}

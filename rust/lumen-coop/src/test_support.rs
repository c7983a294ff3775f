//! Shared by unit tests across this crate: a tiny, non-waking `block_on`
//! for driving a single future to completion without pulling in a real
//! executor when a test only needs to observe one synchronous resolution.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

pub(crate) fn block_on<F: Future>(mut fut: F) -> F::Output {
    let waker = futures::task::noop_waker();
    let mut cx = Context::from_waker(&waker);
    // `F` isn't required to be `Unpin`; every future driven through this
    // helper in practice is (it's built from `Rc`-based state, never
    // self-referential), so the pin is safe here.
    let mut fut = unsafe { Pin::new_unchecked(&mut fut) };
    loop {
        if let Poll::Ready(v) = fut.as_mut().poll(&mut cx) {
            return v;
        }
    }
}

//! Double-buffered frame handoff between one producer stage and one consumer
//! stage.
//!
//! Each link holds two frame instances (A/B) and a selector naming the one
//! most recently published. The producer publishes into the other instance,
//! flips the selector and advances its generation token; the consumer reads
//! frames in generation order and advances its acknowledgment token.
//!
//! A push never overwrites a frame the consumer has not acknowledged. The
//! producer may therefore run one frame ahead of the consumer without
//! blocking, and waits (bounded) only once both instances are unread. Every
//! wait is bounded by the link timeout.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub type Generation = u64;

#[derive(Debug, Fail)]
pub enum MessengerError {
    #[fail(display = "messenger {}: nothing to exchange within {:?}", link, waited)]
    Timeout { link: String, waited: Duration },
    #[fail(display = "messenger {}: other end disconnected", link)]
    Disconnected { link: String },
}

struct State<T> {
    frames: [Option<Arc<T>>; 2],
    selector: bool,
    generation: Generation,
    acknowledged: Generation,
    producer_alive: bool,
    consumer_alive: bool,
}

impl<T> State<T> {
    fn unread(&self) -> Generation {
        self.generation - self.acknowledged
    }
}

struct Shared<T> {
    link: String,
    timeout: Duration,
    state: Mutex<State<T>>,
    published: Condvar,
    acknowledged: Condvar,
}

impl<T> Shared<T> {
    fn timeout_error(&self) -> MessengerError {
        MessengerError::Timeout { link: self.link.clone(), waited: self.timeout }
    }

    fn disconnected_error(&self) -> MessengerError {
        MessengerError::Disconnected { link: self.link.clone() }
    }
}

/// Producer end of a link.
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

/// Consumer end of a link.
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
    last: Option<Pulled<T>>,
}

/// A frame obtained from [`Receiver::pull`].
///
/// `fresh` is false when no new frame was published within the bounded wait
/// and the previously delivered frame is handed out again.
pub struct Pulled<T> {
    pub generation: Generation,
    pub fresh: bool,
    data: Arc<T>,
}

impl<T> Pulled<T> {
    pub fn frame(&self) -> &Arc<T> {
        &self.data
    }
}

impl<T> Clone for Pulled<T> {
    fn clone(&self) -> Self {
        Pulled { generation: self.generation, fresh: self.fresh, data: self.data.clone() }
    }
}

impl<T> Deref for Pulled<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.data
    }
}

impl<T: fmt::Debug> fmt::Debug for Pulled<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Pulled {{ generation: {}, fresh: {}, frame: {:?} }}",
               self.generation, self.fresh, self.data)
    }
}

/// Creates a link. `timeout` bounds every wait on either end.
pub fn channel<T>(link: &str, timeout: Duration) -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(Shared {
        link: link.to_string(),
        timeout: timeout,
        state: Mutex::new(State {
            frames: [None, None],
            selector: false,
            generation: 0,
            acknowledged: 0,
            producer_alive: true,
            consumer_alive: true,
        }),
        published: Condvar::new(),
        acknowledged: Condvar::new(),
    });
    (Sender { shared: shared.clone() }, Receiver { shared: shared, last: None })
}

impl<T> Sender<T> {
    pub fn link(&self) -> &str {
        &self.shared.link
    }

    /// Publishes `frame` as the new current frame and returns its generation.
    pub fn push(&self, frame: T) -> Result<Generation, MessengerError> {
        let shared = &*self.shared;
        let deadline = Instant::now() + shared.timeout;
        let mut state = shared.state.lock();
        loop {
            if !state.consumer_alive {
                return Err(shared.disconnected_error());
            }
            if state.unread() < 2 {
                break;
            }
            if shared.acknowledged.wait_until(&mut state, deadline).timed_out() && state.unread() >= 2 {
                return Err(shared.timeout_error());
            }
        }

        let next = !state.selector;
        state.frames[next as usize] = Some(Arc::new(frame));
        state.selector = next;
        state.generation += 1;
        shared.published.notify_one();
        Ok(state.generation)
    }

    /// Generation of the last published frame.
    pub fn generation(&self) -> Generation {
        self.shared.state.lock().generation
    }
}

impl<T> Receiver<T> {
    pub fn link(&self) -> &str {
        &self.shared.link
    }

    /// Takes the oldest unacknowledged frame, waiting (bounded) for one.
    ///
    /// When the wait elapses without a new frame, the previously delivered
    /// frame is returned again, so repeated pulls without an intervening push
    /// are idempotent. Before any frame was delivered, it fails with
    /// `Timeout` instead.
    pub fn pull(&mut self) -> Result<Pulled<T>, MessengerError> {
        let shared = self.shared.clone();
        let deadline = Instant::now() + shared.timeout;
        let mut state = shared.state.lock();
        while state.unread() == 0 {
            if !state.producer_alive {
                return Err(shared.disconnected_error());
            }
            if shared.published.wait_until(&mut state, deadline).timed_out() && state.unread() == 0 {
                return match self.last {
                    Some(ref last) => Ok(Pulled { fresh: false, ..last.clone() }),
                    None => Err(shared.timeout_error()),
                };
            }
        }

        let generation = state.acknowledged + 1;
        let slot = if generation == state.generation { state.selector } else { !state.selector };
        // The link lets go of an acknowledged frame; re-pulls are served from `last`.
        let frame = match state.frames[slot as usize].take() {
            Some(frame) => frame,
            None => unreachable!("generation {} published without a frame", generation),
        };
        state.acknowledged = generation;
        shared.acknowledged.notify_one();
        drop(state);

        let pulled = Pulled { generation: generation, fresh: true, data: frame };
        self.last = Some(pulled.clone());
        Ok(pulled)
    }

    /// The frame most recently delivered by `pull`, without waiting.
    pub fn current(&self) -> Option<&Pulled<T>> {
        self.last.as_ref()
    }

    /// Frames published but not yet pulled.
    pub fn pending(&self) -> Generation {
        self.shared.state.lock().unread()
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.producer_alive = false;
        self.shared.published.notify_all();
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.consumer_alive = false;
        self.shared.acknowledged.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn short() -> Duration {
        Duration::from_millis(20)
    }

    #[test]
    fn test_push_then_pull() {
        let (tx, mut rx) = channel("test", short());
        let frame = vec![(1u32, 2.5f64), (7, -1.0)];
        assert_eq!(tx.push(frame.clone()).unwrap(), 1);
        let pulled = rx.pull().unwrap();
        assert!(pulled.fresh);
        assert_eq!(pulled.generation, 1);
        assert_eq!(*pulled, frame);
    }

    #[test]
    fn test_duplicate_pull_is_idempotent() {
        let (tx, mut rx) = channel("test", short());
        tx.push(String::from("cycle 1")).unwrap();
        let first = rx.pull().unwrap();
        let second = rx.pull().unwrap();
        assert!(first.fresh);
        assert!(!second.fresh);
        assert_eq!(first.generation, second.generation);
        assert_eq!(*first, *second);
        assert_eq!(rx.current().map(|p| p.generation), Some(1));
    }

    #[test]
    fn test_acknowledged_frame_is_released() {
        let (tx, mut rx) = channel("release", short());
        tx.push(vec![1u32, 2, 3]).unwrap();
        let pulled = rx.pull().unwrap();
        // Held by `pulled` and by the receiver's last frame, not by the link.
        assert_eq!(Arc::strong_count(pulled.frame()), 2);
        drop(pulled);
        assert_eq!(rx.current().map(|p| Arc::strong_count(p.frame())), Some(1));
    }

    #[test]
    fn test_pull_without_frame_times_out() {
        let (_tx, mut rx) = channel::<u32>("idle", short());
        match rx.pull() {
            Err(MessengerError::Timeout { ref link, .. }) => assert_eq!(link, "idle"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_push_without_consumer_is_bounded() {
        let (tx, rx) = channel("slow", short());
        // Both instances may be filled without anyone pulling.
        tx.push(1).unwrap();
        tx.push(2).unwrap();
        assert_eq!(rx.pending(), 2);
        match tx.push(3) {
            Err(MessengerError::Timeout { .. }) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(tx.generation(), 2);
    }

    #[test]
    fn test_frames_delivered_in_order() {
        let (tx, mut rx) = channel("ordered", Duration::from_secs(5));
        let producer = thread::spawn(move || {
            for i in 0..200u64 {
                tx.push(i).unwrap();
            }
        });
        for i in 0..200u64 {
            let p = rx.pull().unwrap();
            assert!(p.fresh);
            assert_eq!(*p, i);
            assert_eq!(p.generation, i + 1);
        }
        producer.join().unwrap();
    }

    #[test]
    fn test_disconnect() {
        let (tx, mut rx) = channel("closing", short());
        tx.push(5).unwrap();
        drop(tx);
        assert_eq!(*rx.pull().unwrap(), 5);
        match rx.pull() {
            Err(MessengerError::Disconnected { .. }) => {}
            other => panic!("unexpected {:?}", other),
        }

        let (tx, rx) = channel("closing", short());
        drop(rx);
        assert!(tx.push(1).is_err());
    }
}

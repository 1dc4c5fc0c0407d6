use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread;

type Observer<S> = Box<dyn Fn(&S) + Send + 'static>;

enum Dispatch<S> {
    Register {
        id: u64,
        active: Arc<AtomicBool>,
        observer: Observer<S>,
        initial: S,
    },
    Publish(S),
    Remove(u64),
}

struct Registered<S> {
    id: u64,
    active: Arc<AtomicBool>,
    observer: Observer<S>,
}

/// Fan-out of collection snapshots to registered observers.
///
/// Messages go through one unbounded channel to a dedicated thread, so
/// publishers never wait for observers and every observer sees snapshots in
/// the order they were published. The thread exits once the notifier is
/// dropped and the queue is drained.
pub(crate) struct Notifier<S> {
    tx: mpsc::Sender<Dispatch<S>>,
    next_id: AtomicU64,
}

impl<S> Notifier<S>
where
    S: Send + 'static,
{
    pub(crate) fn spawn(name: &str) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Dispatch<S>>();
        let collection = name.to_string();
        thread::Builder::new()
            .name(format!("{name}-observers"))
            .spawn(move || dispatch_loop(&collection, rx))?;
        Ok(Self {
            tx,
            next_id: AtomicU64::new(1),
        })
    }

    /// Callers serialize this with `publish` so `initial` is never older than
    /// a snapshot published before it.
    pub(crate) fn register(
        &self,
        initial: S,
        observer: impl Fn(&S) + Send + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        let registered = self.tx.send(Dispatch::Register {
            id,
            active: Arc::clone(&active),
            observer: Box::new(observer),
            initial,
        });
        if registered.is_err() {
            active.store(false, Ordering::Release);
            tracing::error!(observer = id, "observer dispatcher is gone; subscription inactive");
        }

        let tx = self.tx.clone();
        Subscription {
            id,
            active,
            remove: Box::new(move |id| {
                let _ = tx.send(Dispatch::Remove(id));
            }),
        }
    }

    pub(crate) fn publish(&self, snapshot: S) {
        if self.tx.send(Dispatch::Publish(snapshot)).is_err() {
            tracing::warn!("observer dispatcher is gone; notification dropped");
        }
    }
}

fn dispatch_loop<S>(collection: &str, rx: mpsc::Receiver<Dispatch<S>>) {
    let mut observers: Vec<Registered<S>> = Vec::new();
    for message in rx {
        match message {
            Dispatch::Register {
                id,
                active,
                observer,
                initial,
            } => {
                let entry = Registered {
                    id,
                    active,
                    observer,
                };
                if deliver(collection, &entry, &initial) {
                    observers.push(entry);
                }
            }
            Dispatch::Publish(snapshot) => {
                observers.retain(|entry| deliver(collection, entry, &snapshot));
            }
            Dispatch::Remove(id) => observers.retain(|entry| entry.id != id),
        }
    }
}

/// Runs one observer. An observer that panics is deactivated and `false` is
/// returned so the caller drops it; the others keep receiving snapshots.
fn deliver<S>(collection: &str, entry: &Registered<S>, snapshot: &S) -> bool {
    if !entry.active.load(Ordering::Acquire) {
        return true;
    }
    match panic::catch_unwind(AssertUnwindSafe(|| (entry.observer)(snapshot))) {
        Ok(()) => true,
        Err(_) => {
            entry.active.store(false, Ordering::Release);
            tracing::error!(collection, observer = entry.id, "observer panicked; unsubscribed");
            false
        }
    }
}

/// Handle returned by `subscribe`. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    active: Arc<AtomicBool>,
    remove: Box<dyn Fn(u64) + Send + Sync>,
}

impl Subscription {
    /// Stops further notifications. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            (self.remove)(self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

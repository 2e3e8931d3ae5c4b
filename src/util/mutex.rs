//! Thin rename over [`tokio::sync::Mutex`], kept as a dedicated type so
//! call-sites read `Mutex::lock().await` the way the rest of the design
//! expects, and so a future swap to a different primitive touches one file.

pub struct Mutex<T>(tokio::sync::Mutex<T>);

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Mutex(tokio::sync::Mutex::new(value))
    }

    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, T> {
        self.0.lock().await
    }
}

/// Receives every value an [`Observable`] publishes.
pub trait Observer<T> {
    fn update(&mut self, value: &T);
}

impl<T, F> Observer<T> for F
where
    F: FnMut(&T),
{
    fn update(&mut self, value: &T) {
        self(value)
    }
}

/// Single-slot publisher that remembers the last value.
///
/// Registering a new observer replaces the previous one and immediately replays the
/// cached value, so late subscribers do not wait for the next change.
pub struct Observable<T> {
    value: Option<T>,
    observer: Option<Box<dyn Observer<T>>>,
}

impl<T> Observable<T> {
    pub fn new() -> Self {
        Self {
            value: None,
            observer: None,
        }
    }

    pub fn with_value(value: T) -> Self {
        Self {
            value: Some(value),
            observer: None,
        }
    }

    pub fn observe(&mut self, observer: impl Observer<T> + 'static) {
        let mut observer: Box<dyn Observer<T>> = Box::new(observer);
        if let Some(value) = &self.value {
            observer.update(value);
        }
        self.observer = Some(observer);
    }

    /// Detach the current observer; the cached value is kept.
    pub fn clear(&mut self) {
        self.observer = None;
    }

    pub fn notify(&mut self, value: T) {
        if let Some(observer) = self.observer.as_mut() {
            observer.update(&value);
        }
        self.value = Some(value);
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn is_observed(&self) -> bool {
        self.observer.is_some()
    }
}

impl<T> Default for Observable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable")
            .field("value", &self.value)
            .field("observed", &self.observer.is_some())
            .finish()
    }
}

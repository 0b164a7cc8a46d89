/// A registered resource along with the number of outstanding handles to it.
///
/// Each registration gets a distinct identifier so that a handle released after its name was
/// disposed and registered again can never decrement the newer registration.
pub(crate) struct RefCounted<T> {
    id: u64,
    count: usize,
    resource: T,
}

impl<T> RefCounted<T> {
    /// Creates a new `RefCounted` held by a single handle.
    pub fn new(id: u64, resource: T) -> Self {
        Self { id, count: 1, resource }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn resource(&self) -> &T {
        &self.resource
    }

    pub fn into_resource(self) -> T {
        self.resource
    }

    /// Adds a handle.
    pub fn acquire(&mut self) {
        self.count = self.count.saturating_add(1);
    }

    /// Removes a handle, returning `true` once no handles remain.
    pub fn release(&mut self) -> bool {
        self.count = self.count.saturating_sub(1);
        self.count == 0
    }
}

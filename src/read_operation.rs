use media_error::Result;

/// Completion callback of a read: the number of bytes copied (0 at the end
/// of the resource) or an error, together with the destination buffer.
pub type ReadCB = Box<dyn FnOnce(Result<usize>, Vec<u8>) + Send>;

/// The single outstanding read of a data source.
///
/// Running the operation consumes it, so its callback fires at most once.
pub struct ReadOperation {
    position: u64,
    buffer: Vec<u8>,
    callback: ReadCB,
}

impl ReadOperation {
    /// `buffer.len()` is the number of bytes requested.
    pub fn new(position: u64, buffer: Vec<u8>, callback: ReadCB) -> Self {
        Self {
            position,
            buffer,
            callback,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Runs the callback with `result`, deleting the operation afterwards.
    pub fn run(self, result: Result<usize>) {
        let Self {
            buffer, callback, ..
        } = self;
        callback(result, buffer)
    }
}

use crate::read_operation::ReadCB;

/// Reports whether a data source could be opened. Runs once, on the
/// render runner.
pub type InitializeCB = Box<dyn FnOnce(bool) + Send>;

/// Random-access byte source a demuxer reads a media resource through.
///
/// At most one read may be outstanding at a time. Every accepted read
/// completes exactly once: with the number of bytes copied, with 0 at the
/// end of the resource, or with an error.
pub trait DataSource: Send + Sync {
    fn initialize(&self, init_cb: InitializeCB);

    /// Reads up to `buffer.len()` bytes at `position`. The buffer is handed
    /// back through `read_cb`.
    fn read(&self, position: u64, buffer: Vec<u8>, read_cb: ReadCB);

    /// Fails the outstanding read and any later one.
    fn stop(&self);

    fn abort(&self);

    /// Total size in bytes, once known.
    fn get_size(&self) -> Option<u64>;

    fn is_streaming(&self) -> bool;

    fn set_bitrate(&self, _bitrate: u32) {}
}

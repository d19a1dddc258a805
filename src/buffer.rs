/// Reusable buffers owned by one connection driver.
///
/// Capacity is kept between commands, so steady-state traffic does not allocate.
#[derive(Debug, Default)]
pub struct BufferSet {
    /// The logical payload of the packet most recently read.
    /// Bytes are valid until the next read.
    pub read_buffer: Vec<u8>,

    /// Payload of the next outgoing command, before the 16MB split.
    write_buffer: Vec<u8>,

    /// Framed bytes (headers and chunks) ready for the socket.
    pub(crate) frame_buffer: Vec<u8>,
}

impl BufferSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the write buffer and return mutable access.
    #[inline]
    pub fn new_write_buffer(&mut self) -> &mut Vec<u8> {
        self.write_buffer.clear();
        &mut self.write_buffer
    }

    #[inline]
    pub fn write_buffer(&self) -> &[u8] {
        &self.write_buffer
    }

    /// Split borrow used when framing the pending payload.
    #[inline]
    pub(crate) fn write_and_frame_buffers(&mut self) -> (&[u8], &mut Vec<u8>) {
        self.frame_buffer.clear();
        (&self.write_buffer, &mut self.frame_buffer)
    }
}

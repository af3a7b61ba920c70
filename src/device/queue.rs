use std::collections::VecDeque;
use uuid::Uuid;

use crate::error::ConnectionError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub service: Uuid,
    pub characteristic: Uuid,
}

/// A write of one value, possibly split into several chunks that are written one after the
/// other. Always holds at least one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub with_response: bool,
    chunks: VecDeque<Vec<u8>>,
}

impl WriteRequest {
    pub fn new(
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
        with_response: bool,
        chunk_size: Option<usize>,
    ) -> Result<Self, ConnectionError> {
        let chunks = match chunk_size {
            Some(0) => return Err(ConnectionError::InvalidChunkSize),
            Some(size) if value.len() > size => value.chunks(size).map(<[u8]>::to_vec).collect(),
            _ => VecDeque::from([value]),
        };

        Ok(WriteRequest { service, characteristic, with_response, chunks })
    }

    /// The chunk that is (or is about to be) in flight.
    pub fn current_chunk(&self) -> &[u8] {
        self.chunks.front().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn remaining_chunks(&self) -> usize {
        self.chunks.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteProgress {
    /// Nothing was outstanding, the completion was not requested through this queue.
    Unsolicited,
    /// A chunk was written, more chunks of the same value follow.
    Partial,
    Complete,
}

/// Per device FIFOs of GATT requests. At most one read and one write are outstanding at a
/// time, the front of each queue. The next one is issued when the previous one completes.
#[derive(Debug, Default)]
pub struct RequestQueue {
    reads: VecDeque<ReadRequest>,
    writes: VecDeque<WriteRequest>,
}

impl RequestQueue {
    /// Returns true if the read became outstanding and must be issued right away.
    pub fn push_read(&mut self, request: ReadRequest) -> bool {
        self.reads.push_back(request);
        self.reads.len() == 1
    }

    /// Returns true if the write became outstanding and must be issued right away.
    pub fn push_write(&mut self, request: WriteRequest) -> bool {
        self.writes.push_back(request);
        self.writes.len() == 1
    }

    pub fn outstanding_read(&self) -> Option<&ReadRequest> {
        self.reads.front()
    }

    pub fn outstanding_write(&self) -> Option<&WriteRequest> {
        self.writes.front()
    }

    pub fn complete_read(&mut self) -> Option<ReadRequest> {
        self.reads.pop_front()
    }

    pub fn complete_write(&mut self) -> WriteProgress {
        let Some(write) = self.writes.front_mut() else {
            return WriteProgress::Unsolicited;
        };

        write.chunks.pop_front();
        if !write.chunks.is_empty() {
            return WriteProgress::Partial;
        }

        self.writes.pop_front();
        WriteProgress::Complete
    }

    /// Drops the outstanding read.
    pub fn abort_read(&mut self) -> Option<ReadRequest> {
        self.reads.pop_front()
    }

    /// Drops the outstanding write, including any chunks not written yet.
    pub fn abort_write(&mut self) -> Option<WriteRequest> {
        self.writes.pop_front()
    }

    /// Forgets every pending request, returns how many there were.
    pub fn flush(&mut self) -> usize {
        let count = self.reads.len() + self.writes.len();
        self.reads.clear();
        self.writes.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.reads.len() + self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(characteristic: u128) -> ReadRequest {
        ReadRequest { service: Uuid::from_u128(1), characteristic: Uuid::from_u128(characteristic) }
    }

    fn write(value: &[u8], chunk_size: Option<usize>) -> WriteRequest {
        WriteRequest::new(Uuid::from_u128(1), Uuid::from_u128(2), value.to_vec(), true, chunk_size).unwrap()
    }

    #[test]
    fn reads_are_issued_in_order() {
        let mut queue = RequestQueue::default();

        assert!(queue.push_read(read(10)));
        assert!(!queue.push_read(read(11)));
        assert!(!queue.push_read(read(12)));

        assert_eq!(queue.complete_read(), Some(read(10)));
        assert_eq!(queue.outstanding_read(), Some(&read(11)));
        assert_eq!(queue.complete_read(), Some(read(11)));
        assert_eq!(queue.outstanding_read(), Some(&read(12)));
        assert_eq!(queue.complete_read(), Some(read(12)));
        assert!(queue.is_empty());
    }

    #[test]
    fn reads_and_writes_queue_independently() {
        let mut queue = RequestQueue::default();

        assert!(queue.push_read(read(10)));
        assert!(queue.push_write(write(&[1], None)));
        assert!(!queue.push_write(write(&[2], None)));
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.complete_write(), WriteProgress::Complete);
        assert_eq!(queue.outstanding_write().unwrap().current_chunk(), &[2]);
        assert_eq!(queue.outstanding_read(), Some(&read(10)));
    }

    #[test]
    fn long_values_are_split_into_chunks() {
        let request = write(&[1, 2, 3, 4, 5], Some(2));
        assert_eq!(request.remaining_chunks(), 3);
        assert_eq!(request.current_chunk(), &[1, 2]);

        let mut queue = RequestQueue::default();
        queue.push_write(request);

        let mut written = vec![];
        loop {
            written.push(queue.outstanding_write().unwrap().current_chunk().to_vec());
            if queue.complete_write() == WriteProgress::Complete {
                break;
            }
        }

        assert_eq!(written, vec![vec![1, 2], vec![3, 4], vec![5]]);
        assert!(queue.is_empty());
    }

    #[test]
    fn short_values_are_written_whole() {
        assert_eq!(write(&[1, 2], Some(2)).remaining_chunks(), 1);
        assert_eq!(write(&[], Some(4)).current_chunk(), &[] as &[u8]);
        assert_eq!(write(&[1, 2, 3], None).remaining_chunks(), 1);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let result = WriteRequest::new(Uuid::from_u128(1), Uuid::from_u128(2), vec![1], true, Some(0));
        assert!(matches!(result, Err(ConnectionError::InvalidChunkSize)));
    }

    #[test]
    fn aborting_a_chunked_write_drops_its_remaining_chunks() {
        let mut queue = RequestQueue::default();
        queue.push_write(write(&[1, 2, 3, 4], Some(1)));
        queue.push_write(write(&[9], None));

        assert_eq!(queue.complete_write(), WriteProgress::Partial);
        assert_eq!(queue.abort_write().unwrap().remaining_chunks(), 3);
        assert_eq!(queue.outstanding_write().unwrap().current_chunk(), &[9]);
    }

    #[test]
    fn completions_without_requests_are_unsolicited() {
        let mut queue = RequestQueue::default();
        assert_eq!(queue.complete_write(), WriteProgress::Unsolicited);
        assert_eq!(queue.complete_read(), None);
    }

    #[test]
    fn flush_forgets_everything() {
        let mut queue = RequestQueue::default();
        queue.push_read(read(10));
        queue.push_write(write(&[1], None));
        queue.push_write(write(&[2], None));

        assert_eq!(queue.flush(), 3);
        assert!(queue.is_empty());
        assert!(queue.push_read(read(11)));
    }
}

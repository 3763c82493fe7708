//! The bounded staging area between formatted records and the backend.

/// A fixed-capacity byte buffer that hands its contents to a sink when it
/// fills up or passes its threshold.
///
/// The cursor never exceeds `N`: a record that would reach the capacity
/// causes a flush before it is copied in, and a record of `N` bytes or more
/// skips the buffer entirely.
pub struct LogBuffer<const N: usize> {
    data: [u8; N],
    cursor: usize,
    threshold: usize,
}

impl<const N: usize> LogBuffer<N> {
    /// An empty buffer that flushes once it holds `threshold` bytes.
    pub const fn new(threshold: usize) -> Self {
        Self {
            data: [0u8; N],
            cursor: 0,
            threshold: if threshold < N { threshold } else { N },
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Bytes waiting to be flushed.
    pub fn len(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    /// Forget the buffered bytes.
    pub fn clear(&mut self) {
        self.cursor = 0;
    }

    /// Stage `record`, flushing through `sink` as needed.
    ///
    /// Every flush that is due happens even if an earlier one failed; the
    /// first error is returned.
    pub fn append<E, F>(&mut self, record: &[u8], mut sink: F) -> Result<(), E>
    where
        F: FnMut(&[u8]) -> Result<(), E>,
    {
        if record.len() >= N {
            // keep the order of what is already staged
            let flushed = self.flush(&mut sink);
            let written = sink(record);
            return flushed.and(written);
        }

        let mut result = Ok(());
        if self.cursor + record.len() >= N {
            result = self.flush(&mut sink);
        }
        self.data[self.cursor..self.cursor + record.len()].copy_from_slice(record);
        self.cursor += record.len();
        if self.cursor >= self.threshold {
            result = result.and(self.flush(&mut sink));
        }
        result
    }

    /// Hand everything staged to `sink`. The buffer is empty afterwards
    /// whether or not the sink succeeded.
    pub fn flush<E, F>(&mut self, sink: &mut F) -> Result<(), E>
    where
        F: FnMut(&[u8]) -> Result<(), E>,
    {
        if self.cursor == 0 {
            return Ok(());
        }
        let result = sink(&self.data[..self.cursor]);
        self.cursor = 0;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        flushes: Vec<Vec<u8>>,
    }

    impl Recorder {
        fn sink(&mut self) -> impl FnMut(&[u8]) -> Result<(), ()> + '_ {
            move |data: &[u8]| {
                self.flushes.push(data.to_vec());
                Ok(())
            }
        }
    }

    #[test]
    fn threshold_scenario() {
        let mut buffer = LogBuffer::<256>::new(128);
        let mut out = Recorder::default();

        for _ in 0..3 {
            buffer.append(&[b'x'; 20], out.sink()).unwrap();
        }
        assert!(out.flushes.is_empty());
        assert_eq!(buffer.len(), 60);

        buffer.append(&[b'y'; 80], out.sink()).unwrap();
        assert_eq!(out.flushes.len(), 1);
        assert_eq!(out.flushes[0].len(), 140);
        assert_eq!(&out.flushes[0][..60], &[b'x'; 60][..]);
        assert_eq!(&out.flushes[0][60..], &[b'y'; 80][..]);
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn flushes_before_overflowing() {
        let mut buffer = LogBuffer::<64>::new(64);
        let mut out = Recorder::default();

        buffer.append(&[1; 40], out.sink()).unwrap();
        assert!(out.flushes.is_empty());
        // 40 + 24 would reach the capacity
        buffer.append(&[2; 24], out.sink()).unwrap();
        assert_eq!(out.flushes, vec![vec![1; 40]]);
        assert_eq!(buffer.len(), 24);
    }

    #[test]
    fn oversized_records_bypass_the_buffer() {
        let mut buffer = LogBuffer::<32>::new(16);
        let mut out = Recorder::default();

        buffer.append(b"abc", out.sink()).unwrap();
        buffer.append(&[7; 32], out.sink()).unwrap();
        assert_eq!(out.flushes, vec![b"abc".to_vec(), vec![7; 32]]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn cursor_stays_within_capacity() {
        let mut buffer = LogBuffer::<50>::new(45);
        let mut out = Recorder::default();
        let mut total = 0;
        for len in (1..120).map(|i| (i * 7) % 61) {
            let record = vec![b'r'; len];
            buffer.append(&record, out.sink()).unwrap();
            total += len;
            assert!(buffer.len() < buffer.capacity());
        }
        buffer.flush(&mut out.sink()).unwrap();
        let flushed: usize = out.flushes.iter().map(|f| f.len()).sum();
        assert_eq!(flushed, total);
        assert!(out.flushes.iter().all(|f| !f.is_empty()));
    }

    #[test]
    fn failed_flush_still_empties_the_buffer() {
        let mut buffer = LogBuffer::<16>::new(8);
        let mut calls = 0;
        let result = buffer.append(&[0; 10], |_: &[u8]| {
            calls += 1;
            Err("card gone")
        });
        assert_eq!(result, Err("card gone"));
        assert_eq!(calls, 1);
        assert!(buffer.is_empty());
        assert_eq!(buffer.threshold(), 8);
    }
}

//! Encoded packets handed to session consumers

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::bitstream::{apply_replacements, Replacement};

/// Opaque tag identifying the consumer a packet belongs to
pub type ChannelData = Arc<dyn Any + Send + Sync>;

/// One compressed access unit
///
/// Cloning is cheap: the payload and the replacement table are both
/// reference counted, and the payload is freed once the last clone drops.
#[derive(Clone)]
pub struct Packet {
    pub data: Bytes,
    pub pts: i64,
    pub keyframe: bool,
    /// Rewrite table of the session at the time this packet was encoded
    pub replacements: Arc<[Replacement]>,
    pub channel: ChannelData,
}

impl Packet {
    /// The payload with every replacement applied
    pub fn apply_replacements(&self) -> Bytes {
        if self.replacements.is_empty() {
            return self.data.clone();
        }
        Bytes::from(apply_replacements(&self.data, &self.replacements))
    }

    /// The channel tag, if it is a `T`
    pub fn channel_as<T: Any>(&self) -> Option<&T> {
        self.channel.downcast_ref::<T>()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.data.len())
            .field("pts", &self.pts)
            .field("keyframe", &self.keyframe)
            .field("replacements", &self.replacements.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Queue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tracked {
        payload: Vec<u8>,
        drops: Arc<AtomicUsize>,
    }

    impl AsRef<[u8]> for Tracked {
        fn as_ref(&self) -> &[u8] {
            &self.payload
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn packet(data: Bytes, replacements: Vec<Replacement>) -> Packet {
        Packet {
            data,
            pts: 1,
            keyframe: true,
            replacements: replacements.into(),
            channel: Arc::new(7u32),
        }
    }

    #[test]
    fn test_payload_freed_once_after_all_consumers() {
        let drops = Arc::new(AtomicUsize::new(0));
        let data = Bytes::from_owner(Tracked {
            payload: vec![0, 0, 1, 0x65, 0xAA],
            drops: Arc::clone(&drops),
        });
        let original = packet(data, Vec::new());

        let queues: Vec<Queue<Packet>> = (0..4).map(|_| Queue::new()).collect();
        for queue in &queues {
            queue.push(original.clone()).unwrap();
        }
        drop(original);

        for (i, queue) in queues.iter().enumerate() {
            assert_eq!(drops.load(Ordering::SeqCst), 0, "freed before consumer {}", i);
            let received = queue.pop().unwrap();
            assert_eq!(received.data[3], 0x65);
            drop(received);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_apply_replacements() {
        let data = Bytes::from_static(b"\x00\x00\x01\x65\x88");
        let p = packet(
            data.clone(),
            vec![Replacement::start_code_prefix(crate::bitstream::H264_IDR_PREFIX)],
        );
        assert_eq!(&p.apply_replacements()[..], b"\x00\x00\x00\x01\x65\x88");
        // Payload itself is untouched
        assert_eq!(p.data, data);

        let plain = packet(data.clone(), Vec::new());
        assert_eq!(plain.apply_replacements(), data);
    }

    #[test]
    fn test_channel_tag() {
        let p = packet(Bytes::new(), Vec::new());
        assert_eq!(p.channel_as::<u32>(), Some(&7));
        assert!(p.channel_as::<String>().is_none());
        assert!(p.is_empty());
    }
}

pub(crate) mod ring;
pub(crate) use ring::RingQueue;

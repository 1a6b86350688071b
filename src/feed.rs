// Part of seswrapper. Copyright 2018-2020 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Stream framing for forwarding images to a viewer.
//!
//! A frame on the wire is a 4-byte big-endian header length, the header
//! fields as big-endian `u32`, and `length` bytes of payload.

use crate::driver::Frame;
use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use log::*;
use std::{
    io::{self, Read, Write},
    thread,
    time::Duration,
};

const HEADER_LEN: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameHeader {
    pub width: u32,
    pub height: u32,
    /// Payload size in bytes.
    pub length: u32,
    pub code: u32,
}

impl FrameHeader {
    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<BigEndian>(HEADER_LEN)?;
        w.write_u32::<BigEndian>(self.width)?;
        w.write_u32::<BigEndian>(self.height)?;
        w.write_u32::<BigEndian>(self.length)?;
        w.write_u32::<BigEndian>(self.code)
    }

    pub fn read<R: Read>(r: &mut R) -> io::Result<Self> {
        let len = r.read_u32::<BigEndian>()?;
        if len != HEADER_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bad frame header length {}", len),
            ));
        }
        Ok(FrameHeader {
            width: r.read_u32::<BigEndian>()?,
            height: r.read_u32::<BigEndian>()?,
            length: r.read_u32::<BigEndian>()?,
            code: r.read_u32::<BigEndian>()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedFrame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl FeedFrame {
    /// Pack an acquired image, intensities as big-endian `f64`.
    pub fn from_frame(frame: &Frame) -> Self {
        let mut payload = vec![0; frame.data.len() * 8];
        BigEndian::write_f64_into(&frame.data, &mut payload);
        FeedFrame {
            header: FrameHeader {
                width: frame.width.max(0) as u32,
                height: frame.height.max(0) as u32,
                length: payload.len() as u32,
                code: frame.number.max(0) as u32,
            },
            payload,
        }
    }

    pub fn intensities(&self) -> Vec<f64> {
        let mut values = vec![0.0; self.payload.len() / 8];
        BigEndian::read_f64_into(&self.payload[..values.len() * 8], &mut values);
        values
    }

    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        if self.header.length as usize != self.payload.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "payload size does not match header",
            ));
        }
        self.header.write(w)?;
        w.write_all(&self.payload)
    }

    pub fn read<R: Read>(r: &mut R) -> io::Result<Self> {
        let header = FrameHeader::read(r)?;
        let mut payload = vec![0; header.length as usize];
        r.read_exact(&mut payload)?;
        Ok(FeedFrame { header, payload })
    }
}

/// Reads frames from a stream on a background thread so that the consumer
/// can poll with a timeout.
pub struct FrameReader {
    rx: Receiver<io::Result<FeedFrame>>,
}

impl FrameReader {
    pub fn new<R: Read + Send + 'static>(mut source: R) -> Self {
        let (tx, rx) = bounded(4);
        thread::spawn(move || loop {
            let res = FeedFrame::read(&mut source);
            let failed = res.is_err();
            if tx.send(res).is_err() || failed {
                break;
            }
        });
        FrameReader { rx }
    }

    /// Next frame, or `None` when none arrived within `timeout`. The end of
    /// the stream is reported as an `UnexpectedEof` error.
    pub fn poll(&self, timeout: Duration) -> io::Result<Option<FeedFrame>> {
        match self.rx.recv_timeout(timeout) {
            Ok(Ok(frame)) => {
                trace!(
                    "FrameReader: {}x{} frame, {} bytes",
                    frame.header.width,
                    frame.header.height,
                    frame.header.length
                );
                Ok(Some(frame))
            }
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(io::ErrorKind::UnexpectedEof.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn frame() -> Frame {
        Frame::new(7, 2, 2, vec![1.0, 2.5, -3.0, 0.0], vec![], vec![])
    }

    #[test]
    fn test_wire_layout() {
        let feed = FeedFrame::from_frame(&frame());
        let mut buf = Vec::new();
        feed.write(&mut buf).unwrap();
        assert_eq!(&buf[..8], &[0, 0, 0, 16, 0, 0, 0, 2]);
        assert_eq!(&buf[12..20], &[0, 0, 0, 32, 0, 0, 0, 7]);
        assert_eq!(buf.len(), 20 + 32);
        let back = FeedFrame::read(&mut Cursor::new(buf)).unwrap();
        assert_eq!(back.intensities(), vec![1.0, 2.5, -3.0, 0.0]);
    }

    #[test]
    fn test_bad_header() {
        let mut buf = Vec::new();
        buf.write_u32::<BigEndian>(12).unwrap();
        let err = FrameHeader::read(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let mut feed = FeedFrame::from_frame(&frame());
        feed.payload.pop();
        assert!(feed.write(&mut Vec::new()).is_err());
    }

    #[test]
    fn test_reader_poll() {
        let mut buf = Vec::new();
        FeedFrame::from_frame(&frame()).write(&mut buf).unwrap();
        let reader = FrameReader::new(Cursor::new(buf));
        let got = reader.poll(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(got.header.code, 7);
        let end = reader.poll(Duration::from_secs(5)).unwrap_err();
        assert_eq!(end.kind(), io::ErrorKind::UnexpectedEof);
    }

    struct Stalled(Receiver<()>);

    impl Read for Stalled {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            let _ = self.0.recv();
            Ok(0)
        }
    }

    #[test]
    fn test_reader_timeout() {
        let (_tx, rx) = bounded(0);
        let reader = FrameReader::new(Stalled(rx));
        assert!(reader.poll(Duration::from_millis(20)).unwrap().is_none());
    }
}

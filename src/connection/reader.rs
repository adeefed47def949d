//! Exclusive receive side of an open socket.

use std::{
    io,
    task::{Context, Poll},
};

use crate::socket::{FrameReader, ReceivedFrame, receive_frame};

/// Socket reader plus the message-boundary bookkeeping needed to resume
/// after a body stream was abandoned part-way.
pub(crate) struct ReaderSlot {
    reader: Box<dyn FrameReader>,
    // Frames of the current logical message are still on the socket.
    mid_message: bool,
    peer_closed: bool,
}

impl ReaderSlot {
    pub(crate) fn new(reader: Box<dyn FrameReader>) -> Self {
        Self {
            reader,
            mid_message: false,
            peer_closed: false,
        }
    }

    pub(crate) fn poll_receive(
        &mut self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<ReceivedFrame>> {
        self.reader.poll_receive(cx, buf)
    }

    pub(crate) fn is_peer_closed(&self) -> bool { self.peer_closed }

    pub(crate) fn mark_peer_closed(&mut self) {
        self.peer_closed = true;
        self.mid_message = false;
    }

    pub(crate) fn begin_message(&mut self) { self.mid_message = true; }

    pub(crate) fn finish_message(&mut self) { self.mid_message = false; }

    /// Track a frame whose message was not handed to a body stream.
    pub(crate) fn skip_message(&mut self, end_of_message: bool) { self.mid_message = !end_of_message; }

    /// Discard the rest of an abandoned message, then receive the first
    /// frame of the next one.
    ///
    /// Returns the frame together with the number of frames discarded.
    pub(crate) async fn next_message_frame(
        &mut self,
        buf: &mut [u8],
    ) -> io::Result<(ReceivedFrame, usize)> {
        let mut discarded = 0;
        loop {
            let frame = receive_frame(&mut *self.reader, &mut *buf).await?;
            match frame {
                ReceivedFrame::Close => {
                    self.mark_peer_closed();
                    return Ok((frame, discarded));
                }
                ReceivedFrame::Data { end_of_message, .. } if self.mid_message => {
                    discarded += 1;
                    if end_of_message {
                        self.mid_message = false;
                    }
                }
                ReceivedFrame::Data { .. } => return Ok((frame, discarded)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use rstest::rstest;

    use super::*;

    /// Reader replaying a fixed script of frames.
    struct Scripted(VecDeque<ReceivedFrame>);

    impl FrameReader for Scripted {
        fn poll_receive(
            &mut self,
            _cx: &mut Context<'_>,
            _buf: &mut [u8],
        ) -> Poll<io::Result<ReceivedFrame>> {
            Poll::Ready(Ok(self.0.pop_front().unwrap_or(ReceivedFrame::Close)))
        }
    }

    fn data(len: usize, end_of_message: bool) -> ReceivedFrame {
        ReceivedFrame::Data {
            len,
            end_of_message,
        }
    }

    fn slot(frames: impl IntoIterator<Item = ReceivedFrame>) -> ReaderSlot {
        ReaderSlot::new(Box::new(Scripted(frames.into_iter().collect())))
    }

    #[tokio::test]
    async fn idle_slot_returns_the_next_frame() {
        let mut slot = slot([data(3, true)]);
        let (frame, discarded) = slot.next_message_frame(&mut [0; 8]).await.expect("frame");
        assert_eq!(frame, data(3, true));
        assert_eq!(discarded, 0);
    }

    #[rstest]
    #[case::one_frame_left(vec![data(8, true), data(2, true)], 1)]
    #[case::several_left(vec![data(8, false), data(8, false), data(1, true), data(2, true)], 3)]
    #[tokio::test]
    async fn abandoned_tails_are_skipped(
        #[case] frames: Vec<ReceivedFrame>,
        #[case] expected_discarded: usize,
    ) {
        let mut slot = slot(frames);
        slot.begin_message();
        let (frame, discarded) = slot.next_message_frame(&mut [0; 8]).await.expect("frame");
        assert_eq!(frame, data(2, true));
        assert_eq!(discarded, expected_discarded);
    }

    #[tokio::test]
    async fn close_during_discard_marks_the_peer_closed() {
        let mut slot = slot([data(8, false)]);
        slot.skip_message(false);
        let (frame, discarded) = slot.next_message_frame(&mut [0; 8]).await.expect("frame");
        assert_eq!(frame, ReceivedFrame::Close);
        assert_eq!(discarded, 1);
        assert!(slot.is_peer_closed());
    }

    #[test]
    fn final_frames_leave_no_tail() {
        let mut slot = slot([]);
        slot.skip_message(true);
        assert!(!slot.mid_message);
        slot.begin_message();
        slot.finish_message();
        assert!(!slot.mid_message);
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Frame {
    pub id: u32,
}

impl Frame {
    pub fn new(id: u32) -> Self {
        Self { id }
    }

    pub fn advance(&mut self) {
        self.id = self.id.wrapping_add(1);
    }
}

#[test]
fn test_frame_advance_wraps() {
    let mut frame = Frame::new(u32::MAX - 1);
    frame.advance();
    assert_eq!(frame.id, u32::MAX);
    frame.advance();
    assert_eq!(frame.id, 0);
}

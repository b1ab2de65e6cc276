/// Two slots whose roles (current / previous) alternate every frame.
///
/// Swapping flips an index; the slots themselves never move, so a handle
/// that was current on frame N-1 is previous on frame N. Starting at index 1
/// keeps `current == slots[frame % 2]` when [`swap`](Self::swap) is called
/// once per frame from frame 2 on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PingPong<T> {
    slots: [T; 2],
    current: usize,
}

impl<T: Copy> PingPong<T> {
    #[must_use]
    pub fn new(first: T, second: T) -> Self {
        Self {
            slots: [first, second],
            current: 1,
        }
    }

    #[inline]
    pub fn swap(&mut self) {
        self.current ^= 1;
    }

    #[inline]
    #[must_use]
    pub fn current(&self) -> T {
        self.slots[self.current]
    }

    #[inline]
    #[must_use]
    pub fn previous(&self) -> T {
        self.slots[self.current ^ 1]
    }

    #[inline]
    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current
    }

    #[inline]
    #[must_use]
    pub fn slots(&self) -> [T; 2] {
        self.slots
    }
}

impl<T: Copy + Default> Default for PingPong<T> {
    fn default() -> Self {
        Self::new(T::default(), T::default())
    }
}

/// Two buffers of the same shape; passes read one and write the other, then
/// `swap` makes the freshly written buffer the next read source.
#[derive(Clone, Debug)]
pub struct PingPong<T> {
    buffers: [T; 2],
    read: usize,
}

impl<T: Clone> PingPong<T> {
    pub fn new(initial: T) -> Self {
        Self {
            buffers: [initial.clone(), initial],
            read: 0,
        }
    }
}

impl<T> PingPong<T> {
    pub fn read(&self) -> &T {
        &self.buffers[self.read]
    }

    pub fn write(&mut self) -> &mut T {
        &mut self.buffers[1 - self.read]
    }

    /// Both halves at once, for passes that read the current state while
    /// writing the next one.
    pub fn split(&mut self) -> (&T, &mut T) {
        let (first, second) = self.buffers.split_at_mut(1);
        if self.read == 0 {
            (&first[0], &mut second[0])
        } else {
            (&second[0], &mut first[0])
        }
    }

    /// Mutable access to the read buffer, for in-place edits outside a pass.
    pub fn read_mut(&mut self) -> &mut T {
        &mut self.buffers[self.read]
    }

    pub fn swap(&mut self) {
        self.read = 1 - self.read;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_promotes_written_buffer() {
        let mut buffers = PingPong::new(0);
        *buffers.write() = 7;
        assert_eq!(*buffers.read(), 0);
        buffers.swap();
        assert_eq!(*buffers.read(), 7);
    }

    #[test]
    fn split_never_aliases() {
        let mut buffers = PingPong::new(vec![1, 2]);
        buffers.swap();
        let (read, write) = buffers.split();
        write[0] = read[1] * 10;
        buffers.swap();
        assert_eq!(buffers.read()[0], 20);
    }
}

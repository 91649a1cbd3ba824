use std::time::SystemTime;

/// A single probe outcome as printed by the verification script
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Sample {
    pub status: String,
    pub time: SystemTime,
}
impl Sample {
    pub fn new(status: impl Into<String>, time: SystemTime) -> Sample {
        Sample {
            status: status.into(),
            time,
        }
    }
}


/// Fixed-capacity window over the most recent samples of one key. The window grows until it
///  reaches its capacity and turns into a ring buffer from then on, overwriting the oldest slot
///  on every push.
#[derive(Clone, Debug)]
pub struct WindowedSampler {
    slots: Slots,
    capacity: usize,
    num_pushed: u64,
}

#[derive(Clone, Debug)]
enum Slots {
    Growing(Vec<Sample>),
    Ring {
        buf: Vec<Sample>,
        /// index of the oldest sample, i.e. the slot to overwrite next
        next: usize,
    },
}

impl WindowedSampler {
    pub fn new(capacity: usize) -> WindowedSampler {
        assert!(capacity > 0, "a sample window needs a capacity of at least 1");

        WindowedSampler {
            slots: Slots::Growing(Vec::with_capacity(capacity)),
            capacity,
            num_pushed: 0,
        }
    }

    /// total number of pushes since creation, which keeps counting after the window is full
    pub fn num_pushed(&self) -> u64 {
        self.num_pushed
    }

    /// number of samples currently in the window, saturating at the capacity
    pub fn len(&self) -> usize {
        match &self.slots {
            Slots::Growing(buf) => buf.len(),
            Slots::Ring { buf, .. } => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&mut self, sample: Sample) {
        self.num_pushed += 1;

        match &mut self.slots {
            Slots::Growing(buf) => {
                buf.push(sample);
                if buf.len() == self.capacity {
                    let buf = std::mem::take(buf);
                    self.slots = Slots::Ring { buf, next: 0 };
                }
            }
            Slots::Ring { buf, next } => {
                buf[*next] = sample;
                *next = (*next + 1) % self.capacity;
            }
        }
    }

    /// Returns the `n` most recent samples, oldest first. Callers are expected to check `len()`
    ///  first: asking for more samples than the window holds returns only what is there.
    pub fn last_n(&self, n: usize) -> Vec<Sample> {
        let all = self.samples();
        let n = n.min(all.len());
        all[all.len() - n..].to_vec()
    }

    /// all samples in the window in chronological order
    pub fn samples(&self) -> Vec<Sample> {
        match &self.slots {
            Slots::Growing(buf) => buf.clone(),
            Slots::Ring { buf, next } => {
                buf[*next..].iter()
                    .chain(buf[..*next].iter())
                    .cloned()
                    .collect()
            }
        }
    }
}

use crate::errors::*;
use indexmap::map::{Entry, IndexMap};

/// Registry of open channels keyed by channel id, plus the id allocator.
///
/// Automatic allocation scans upward from the last id handed out and wraps around to 1 once
/// before giving up, so ids freed below the cursor are eventually reused without rescanning
/// from 1 on every call.
pub(crate) struct ChannelSlots<T> {
    slots: IndexMap<u16, T>,
    last_channel_id: Option<u16>,
    channel_max: u16,
}

impl<T> ChannelSlots<T> {
    pub(crate) fn new() -> ChannelSlots<T> {
        ChannelSlots {
            slots: IndexMap::new(),
            last_channel_id: None,
            channel_max: 0,
        }
    }

    pub(crate) fn channel_max(&self) -> u16 {
        self.channel_max
    }

    pub(crate) fn set_channel_max(&mut self, channel_max: u16) {
        debug_assert!(
            self.slots.is_empty(),
            "channel_max should not be set after channels have been opened"
        );
        self.channel_max = channel_max;
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn get(&self, channel_id: u16) -> Option<&T> {
        self.slots.get(&channel_id)
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &T> {
        self.slots.values()
    }

    pub(crate) fn drain(&mut self) -> Vec<T> {
        self.slots.drain(..).map(|(_, t)| t).collect()
    }

    pub(crate) fn remove(&mut self, channel_id: u16) -> Option<T> {
        self.slots.remove(&channel_id)
    }

    /// Insert a new entry under `channel_id`, or under the next available id if `None`.
    ///
    /// An id whose current occupant satisfies `reclaimable` counts as free; the occupant is
    /// replaced.
    pub(crate) fn insert<R, F, U>(
        &mut self,
        channel_id: Option<u16>,
        reclaimable: R,
        make_entry: F,
    ) -> Result<U>
    where
        R: Fn(&T) -> bool,
        F: FnOnce(u16) -> Result<(T, U)>,
    {
        let channel_id = match channel_id {
            Some(channel_id) => {
                if channel_id == 0
                    || channel_id > self.channel_max
                    || !self.is_free(channel_id, &reclaimable)
                {
                    return UnavailableChannelIdSnafu { channel_id }.fail();
                }
                channel_id
            }
            None => self.next_available_channel_id(&reclaimable)?,
        };
        let (t, u) = make_entry(channel_id)?;
        match self.slots.entry(channel_id) {
            Entry::Occupied(mut entry) => {
                entry.insert(t);
            }
            Entry::Vacant(entry) => {
                entry.insert(t);
            }
        }
        Ok(u)
    }

    fn next_available_channel_id<R>(&mut self, reclaimable: &R) -> Result<u16>
    where
        R: Fn(&T) -> bool,
    {
        let start = self
            .last_channel_id
            .and_then(|last| last.checked_add(1))
            .unwrap_or(1);
        let found = match self.scan_from(start, reclaimable) {
            Some(channel_id) => Some(channel_id),
            None if start > 1 => self.scan_from(1, reclaimable),
            None => None,
        };
        match found {
            Some(channel_id) => {
                self.last_channel_id = Some(channel_id);
                Ok(channel_id)
            }
            None => ExhaustedChannelIdsSnafu {
                channel_max: self.channel_max,
            }
            .fail(),
        }
    }

    fn scan_from<R>(&self, start: u16, reclaimable: &R) -> Option<u16>
    where
        R: Fn(&T) -> bool,
    {
        if start > self.channel_max {
            return None;
        }
        (start..=self.channel_max).find(|channel_id| self.is_free(*channel_id, reclaimable))
    }

    fn is_free<R>(&self, channel_id: u16, reclaimable: &R) -> bool
    where
        R: Fn(&T) -> bool,
    {
        match self.slots.get(&channel_id) {
            None => true,
            Some(t) => reclaimable(t),
        }
    }
}

use std::ops::Range;
use crate::utils::utils_errors::SwitchoptError;

/// One continuous piece of a partition's trajectory, lying between two events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventSegment {
    /// Position of the segment inside the partition, `0..=num_events`.
    pub index: usize,
    /// Sample range of the segment in the partition's arrays.
    pub range: Range<usize>
}
impl EventSegment {
    pub fn is_empty(&self) -> bool { self.range.is_empty() }
    pub fn len(&self) -> usize { self.range.len() }
    pub fn first(&self) -> usize { self.range.start }
    pub fn last(&self) -> usize { self.range.end - 1 }
}

pub struct EventSegmentsUtils;
impl EventSegmentsUtils {
    /// Splits `num_samples` trajectory samples at the given events-past-the-end indices.  A partition with
    /// `NE` events yields `NE + 1` segments, some of which may be empty when an event coincides with a
    /// partition boundary.  At an event the sample of the event time belongs to the segment before it
    /// and is repeated as the first sample of the segment after it.
    ///
    /// ## Example
    /// ```
    /// use switchopt::integration::event_segments::EventSegmentsUtils;
    /// let segments = EventSegmentsUtils::get_segments(6, &[3]).unwrap();
    /// assert_eq!(segments[0].range, 0..3);
    /// assert_eq!(segments[1].range, 3..6);
    /// ```
    pub fn get_segments(num_samples: usize, events_past_the_end_indices: &[usize]) -> Result<Vec<EventSegment>, SwitchoptError> {
        let mut out = Vec::with_capacity(events_past_the_end_indices.len() + 1);
        let mut begin = 0;
        for (j, &end) in events_past_the_end_indices.iter().enumerate() {
            if end < begin || end > num_samples {
                return Err(SwitchoptError::new_generic_error_str(&format!("Events past the end index {} (event {}) is not in [{}, {}].", end, j, begin, num_samples), file!(), line!()));
            }
            out.push(EventSegment { index: j, range: begin..end });
            begin = end;
        }
        out.push(EventSegment { index: events_past_the_end_indices.len(), range: begin..num_samples });
        Ok(out)
    }
}

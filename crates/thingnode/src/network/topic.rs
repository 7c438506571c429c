/// The destination of an inbound broker message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    /// A read request, for the whole device or a single property.
    State {
        /// Device identifier.
        device: &'a str,
        /// Property identifier.
        property: Option<&'a str>,
    },
    /// A write request, for the whole device or a single property.
    Set {
        /// Device identifier.
        device: &'a str,
        /// Property identifier.
        property: Option<&'a str>,
    },
    /// Any other sub-topic, forwarded to the device handler.
    Other {
        /// Device identifier.
        device: &'a str,
        /// Remaining topic after the device identifier.
        sub_topic: &'a str,
    },
}

/// Routes `{base}/{device}/...` topics.
///
/// Returns `None` for topics outside `base` or without a device segment.
#[must_use]
pub fn route<'a>(topic: &'a str, base: &str, state: &str, set: &str) -> Option<Route<'a>> {
    let rest = topic.strip_prefix(base)?.strip_prefix('/')?;

    let (device, sub_topic) = rest.split_once('/').unwrap_or((rest, ""));
    if device.is_empty() {
        return None;
    }

    let (head, tail) = sub_topic.split_once('/').unwrap_or((sub_topic, ""));
    let property = (!tail.is_empty()).then_some(tail);

    Some(if head == state {
        Route::State { device, property }
    } else if head == set {
        Route::Set { device, property }
    } else {
        Route::Other { device, sub_topic }
    })
}

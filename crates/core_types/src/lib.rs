use serde::Serialize;

/// Milliseconds since the Unix epoch, as stamped on every emitted event.
pub type Timestamp = u64;

/// Stable identifier the mirror hands out for a tracked node.
///
/// Ids start at 1 and are never reused within a recording session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

/// Identifier for a tracked stylesheet (constructed or linked).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StyleSheetId(pub u32);

/// Identity of a frame as seen by the parent-side message relay.
///
/// The host assigns one per browsing context; iframe elements in the parent document
/// carry the key of the frame they embed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameKey(pub u64);

/// Allocation over a raw counter shared by the node and stylesheet mirrors.
pub trait RawId: Copy + Eq + std::hash::Hash {
    fn from_raw(raw: u32) -> Self;
}

impl RawId for NodeId {
    fn from_raw(raw: u32) -> Self {
        NodeId(raw)
    }
}

impl RawId for StyleSheetId {
    fn from_raw(raw: u32) -> Self {
        StyleSheetId(raw)
    }
}

macro_rules! numeric_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $($variant = $value),+
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_u8(*self as u8)
            }
        }
    };
}

numeric_enum!(
    /// Pointer and focus interactions, encoded as in the replay format.
    MouseInteractionKind {
        MouseUp = 0,
        MouseDown = 1,
        Click = 2,
        ContextMenu = 3,
        DblClick = 4,
        Focus = 5,
        Blur = 6,
        TouchStart = 7,
        TouchEnd = 9,
        TouchCancel = 10,
    }
);

numeric_enum!(
    MediaInteractionKind {
        Play = 0,
        Pause = 1,
        Seeked = 2,
        VolumeChange = 3,
        RateChange = 4,
    }
);

numeric_enum!(
    CanvasContext {
        TwoD = 0,
        WebGl = 1,
        WebGl2 = 2,
    }
);

/// Which pointer stream a batch of positions came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerStream {
    Mouse,
    Touch,
    Drag,
}

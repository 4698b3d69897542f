use std::fmt::Display;

use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};

// Defines a new type that wraps a String for use as a textual label.
macro_rules! labeltype {
    ($name:ident) => {
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

labeltype!(Answer);

const NO_ANSWER: &str = "No answer";
const LETTER_COUNT: usize = 26;

impl Answer {
    /// Label for the choice at `index` within a row: `A`..`Z`, then
    /// `Choice N` (1-based) for anything past the alphabet.
    pub fn from_choice_index(index: usize) -> Self {
        if index < LETTER_COUNT {
            Self(((b'A' + index as u8) as char).to_string())
        } else {
            Self(format!("Choice {}", index + 1))
        }
    }

    /// Sentinel recorded for questions the submission did not cover.
    pub fn no_answer() -> Self {
        Self(NO_ANSWER.to_string())
    }

    pub fn is_no_answer(&self) -> bool {
        self.0 == NO_ANSWER
    }

    /// Inverse of [`Answer::from_choice_index`]. Returns `None` for the
    /// sentinel and anything that is not a choice label.
    pub fn choice_index(&self) -> Option<usize> {
        let s = self.0.as_str();
        if let [letter] = s.as_bytes() {
            if letter.is_ascii_uppercase() {
                return Some((letter - b'A') as usize);
            }
            return None;
        }

        let ordinal = s.strip_prefix("Choice ")?.parse::<usize>().ok()?;
        if ordinal > LETTER_COUNT {
            Some(ordinal - 1)
        } else {
            None
        }
    }
}

/// One resolved answer per detected row, in row order.
pub type AnswerSequence = Vec<Answer>;

/// Axis-aligned rectangle delimiting the answer area within an image.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl GridRegion {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn to_rect(&self) -> Rect {
        Rect::at(self.x as i32, self.y as i32).of_size(self.width.max(1), self.height.max(1))
    }

    /// Clips the region to an image of the given dimensions. Returns `None`
    /// when nothing of the region remains.
    pub fn clamp_to(&self, (width, height): (u32, u32)) -> Option<GridRegion> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let clamped = GridRegion {
            x: self.x,
            y: self.y,
            width: self.width.min(width - self.x),
            height: self.height.min(height - self.y),
        };
        if clamped.width == 0 || clamped.height == 0 {
            None
        } else {
            Some(clamped)
        }
    }
}

/// A single detected mark region. Coordinates are in full-image pixels.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BubbleCandidate {
    pub center_x: f32,
    pub center_y: f32,
    pub area: f32,
    pub width: u32,
    pub height: u32,
}

impl BubbleCandidate {
    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            0.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    /// The candidate's bounding box, centred on its centre point.
    pub fn bounds(&self) -> Rect {
        let left = (self.center_x - self.width as f32 / 2.0).round() as i32;
        let top = (self.center_y - self.height as f32 / 2.0).round() as i32;
        Rect::at(left, top).of_size(self.width.max(1), self.height.max(1))
    }
}

/// Bubbles sharing roughly the same vertical position, ordered left to right.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Row {
    pub bubbles: Vec<BubbleCandidate>,
}

impl Row {
    pub fn mean_y(&self) -> f32 {
        if self.bubbles.is_empty() {
            return 0.0;
        }
        self.bubbles.iter().map(|b| b.center_y).sum::<f32>() / self.bubbles.len() as f32
    }

    pub fn len(&self) -> usize {
        self.bubbles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bubbles.is_empty()
    }
}

/// Identifies one bubble on a sheet: the question (row) and the answer
/// choice within it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChoiceKey {
    pub row: usize,
    pub choice: usize,
}

impl ChoiceKey {
    pub fn new(row: usize, choice: usize) -> Self {
        Self { row, choice }
    }

    pub fn answer(&self) -> Answer {
        Answer::from_choice_index(self.choice)
    }
}

//! Buffer marks set by the shell (`SetMark`)

/// Oldest marks are dropped beyond this many
pub const MARK_LIMIT: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferMark {
    pub id: String,
    pub line: usize,
    pub hidden: bool,
}

#[derive(Debug, Default)]
pub struct BufferMarkDetection {
    marks: Vec<BufferMark>,
    next_anonymous: u64,
}

impl BufferMarkDetection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mark; an existing mark with the same id is moved.
    pub fn add_mark(&mut self, id: Option<String>, line: usize, hidden: bool) -> &BufferMark {
        let id = id.unwrap_or_else(|| {
            self.next_anonymous += 1;
            format!("mark-{}", self.next_anonymous)
        });
        self.marks.retain(|m| m.id != id);
        if self.marks.len() >= MARK_LIMIT {
            let excess = self.marks.len() + 1 - MARK_LIMIT;
            self.marks.drain(..excess);
        }
        self.marks.push(BufferMark { id, line, hidden });
        &self.marks[self.marks.len() - 1]
    }

    pub fn get_mark(&self, id: &str) -> Option<&BufferMark> {
        self.marks.iter().find(|m| m.id == id)
    }

    /// Marks in insertion order
    pub fn marks(&self) -> &[BufferMark] {
        &self.marks
    }

    /// Visible marks only
    pub fn visible_marks(&self) -> impl Iterator<Item = &BufferMark> {
        self.marks.iter().filter(|m| !m.hidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_mark_moves() {
        let mut marks = BufferMarkDetection::new();
        marks.add_mark(Some("build".to_string()), 3, false);
        marks.add_mark(Some("build".to_string()), 10, false);
        assert_eq!(marks.marks().len(), 1);
        assert_eq!(marks.get_mark("build").map(|m| m.line), Some(10));
    }

    #[test]
    fn test_anonymous_marks_get_ids() {
        let mut marks = BufferMarkDetection::new();
        let first = marks.add_mark(None, 1, true).id.clone();
        let second = marks.add_mark(None, 2, false).id.clone();
        assert_ne!(first, second);
        assert_eq!(marks.visible_marks().count(), 1);
    }

    #[test]
    fn test_marks_are_bounded() {
        let mut marks = BufferMarkDetection::new();
        marks.add_mark(Some("first".to_string()), 0, false);
        for line in 1..MARK_LIMIT + 10 {
            marks.add_mark(None, line, false);
        }
        assert_eq!(marks.marks().len(), MARK_LIMIT);
        assert!(marks.get_mark("first").is_none());
        assert_eq!(marks.marks().last().map(|m| m.line), Some(MARK_LIMIT + 9));
    }
}

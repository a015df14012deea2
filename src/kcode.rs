//! Indented source writer used by the emitter.

const INDENT: &str = "    ";

#[derive(Debug, Default)]
pub struct KCode {
    out: String,
    depth: usize,
}

impl KCode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write one line at the current depth. Empty text writes an empty line.
    pub fn nl(&mut self, text: impl AsRef<str>) -> &mut Self {
        let text = text.as_ref();
        if !text.is_empty() {
            for _ in 0..self.depth {
                self.out.push_str(INDENT);
            }
            self.out.push_str(text);
        }
        self.out.push('\n');
        self
    }

    /// Write one line one level deeper than the current depth.
    pub fn tab(&mut self, text: impl AsRef<str>) -> &mut Self {
        self.depth += 1;
        self.nl(text);
        self.depth -= 1;
        self
    }

    /// `header {`, the body one level deeper, then `}`.
    pub fn block<F>(&mut self, header: impl AsRef<str>, body: F) -> &mut Self
    where
        F: FnOnce(&mut KCode),
    {
        self.nl(format!("{} {{", header.as_ref()));
        self.indented(body);
        self.nl("}")
    }

    pub fn indented<F>(&mut self, body: F) -> &mut Self
    where
        F: FnOnce(&mut KCode),
    {
        self.depth += 1;
        body(self);
        self.depth -= 1;
        self
    }

    pub fn finish(self) -> String {
        self.out
    }
}

use cloverup_core::Partition;
use log::{info, warn};
use std::io::{BufRead, Write};

/// Operator console. Reads answers line by line; end of input reads as `None`.
pub struct Prompt<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Prompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn say(&mut self, line: &str) {
        let _ = writeln!(self.output, "{}", line);
    }

    pub fn ask(&mut self, question: &str) -> Option<String> {
        let _ = write!(self.output, "{} ", question);
        let _ = self.output.flush();
        let mut answer = String::new();
        match self.input.read_line(&mut answer) {
            Ok(0) => None,
            Ok(_) => Some(answer.trim().to_string()),
            Err(err) => {
                warn!("event=input_error cause={}", err);
                None
            }
        }
    }

    /// Shows the 1-based candidate list plus an exit entry. Returns the chosen
    /// index, or `None` when the operator exits.
    pub fn choose_partition(&mut self, candidates: &[Partition]) -> Option<usize> {
        for (idx, partition) in candidates.iter().enumerate() {
            self.say(&format!("{}. {}", idx + 1, partition.id));
        }
        let exit = candidates.len() + 1;
        self.say(&format!("{}. Exit", exit));

        loop {
            let answer = self.ask("Choose an option:")?;
            let Ok(choice) = answer.parse::<usize>() else {
                warn!("event=invalid_input input={:?}", answer);
                continue;
            };
            if choice == exit {
                info!("event=exiting");
                return None;
            }
            if (1..=candidates.len()).contains(&choice) {
                let partition = &candidates[choice - 1];
                info!("event=efi_partition_selected partition={}", partition.id);
                return Some(choice - 1);
            }
            warn!("event=invalid_choice choice={}", choice);
        }
    }

    pub fn into_output(self) -> W {
        self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn candidates() -> Vec<Partition> {
        vec![
            Partition::new("disk0s1", "1: EFI EFI disk0s1"),
            Partition::new("disk2s1", "1: EFI EFI disk2s1"),
        ]
    }

    #[test]
    fn rejects_bad_input_until_valid() {
        let mut prompt = Prompt::new(Cursor::new("abc\n-1\n0\n7\n2\n"), Vec::new());
        assert_eq!(prompt.choose_partition(&candidates()), Some(1));
        let shown = String::from_utf8(prompt.into_output()).unwrap();
        assert!(shown.contains("1. disk0s1"));
        assert!(shown.contains("3. Exit"));
        assert_eq!(shown.matches("Choose an option:").count(), 5);
    }

    #[test]
    fn exit_entry_returns_none() {
        let mut prompt = Prompt::new(Cursor::new("3\n"), Vec::new());
        assert_eq!(prompt.choose_partition(&candidates()), None);
    }

    #[test]
    fn end_of_input_returns_none() {
        let mut prompt = Prompt::new(Cursor::new("x\n"), Vec::new());
        assert_eq!(prompt.choose_partition(&candidates()), None);
    }
}

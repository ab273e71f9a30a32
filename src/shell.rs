//! Interactive menu driving a [`Heap`].
//!
//! The shell keeps a small table of live allocations so the user can free
//! them by index, and reads its commands as whitespace-separated numbers
//! from any buffered reader.

use std::collections::VecDeque;
use std::io::{BufRead, Write};

use anyhow::Result;
use log::debug;

use crate::heap::{Heap, Pointer, Strategy};

/// Maximum number of allocations the shell keeps track of.
pub const MAX_ALLOCATIONS: usize = 10;

/// What the user typed when a number was expected.
enum Reply {
    Number(i64),
    Invalid,
    Eof,
}

pub struct Shell<R, W> {
    heap: Heap,
    /// Live allocations, in the order they were made.
    allocations: Vec<Pointer>,
    input: R,
    output: W,
    /// Words of the current input line not consumed yet.
    pending: VecDeque<String>,
}

impl<R: BufRead, W: Write> Shell<R, W> {
    pub fn new(heap: Heap, input: R, output: W) -> Self {
        Self {
            heap,
            allocations: Vec::with_capacity(MAX_ALLOCATIONS),
            input,
            output,
            pending: VecDeque::new(),
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn allocations(&self) -> &[Pointer] {
        &self.allocations
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    /// Run the menu until the user quits or the input ends.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.print_menu()?;

            let choice = match self.read_number()? {
                Reply::Number(choice) => choice,
                Reply::Invalid => {
                    writeln!(self.output, "Invalid input. Please enter a number.")?;
                    continue;
                }
                Reply::Eof => break,
            };

            let keep_going = match choice {
                1 => self.allocate()?,
                2 => self.free()?,
                3 => {
                    write!(self.output, "{}", self.heap)?;
                    true
                }
                4 => self.change_strategy()?,
                5 => {
                    writeln!(self.output, "Quitting.")?;
                    false
                }
                _ => {
                    writeln!(self.output, "Invalid choice. Please enter a number between 1 and 5.")?;
                    true
                }
            };

            if !keep_going {
                break;
            }
        }

        self.output.flush()?;
        Ok(())
    }

    fn print_menu(&mut self) -> Result<()> {
        writeln!(self.output)?;
        writeln!(self.output, "Memory Allocator Menu (Strategy: {})", self.heap.strategy())?;
        writeln!(self.output, "1. Allocate Memory")?;
        writeln!(self.output, "2. Free Memory")?;
        writeln!(self.output, "3. Print Heap Status")?;
        writeln!(self.output, "4. Change Allocation Strategy")?;
        writeln!(self.output, "5. Quit")?;
        self.prompt("Enter your choice: ")
    }

    /// Each action returns `false` once the input has run out.
    fn allocate(&mut self) -> Result<bool> {
        self.prompt("Enter size to allocate: ")?;

        let size = match self.read_number()? {
            Reply::Number(size) if size > 0 => size,
            Reply::Eof => return Ok(false),
            _ => {
                writeln!(self.output, "Invalid size. Please enter a positive integer.")?;
                return Ok(true);
            }
        };

        if self.allocations.len() >= MAX_ALLOCATIONS {
            writeln!(self.output, "Maximum allocations tracked. Free memory to allocate more.")?;
            return Ok(true);
        }

        // Sizes that do not fit in the address space cannot fit in the
        // arena either.
        let ptr = usize::try_from(size).ok().and_then(|size| self.heap.allocate(size));
        match ptr {
            Some(ptr) => {
                writeln!(self.output, "Allocated {size} bytes at address: {ptr}")?;
                self.allocations.push(ptr);
            }
            None => writeln!(self.output, "Memory allocation failed!")?,
        }
        Ok(true)
    }

    fn free(&mut self) -> Result<bool> {
        if self.allocations.is_empty() {
            writeln!(self.output, "No memory blocks allocated to free.")?;
            return Ok(true);
        }

        self.prompt(&format!(
            "Enter index of allocation to free (0 to {}, -1 to free all): ",
            self.allocations.len() - 1
        ))?;

        match self.read_number()? {
            Reply::Number(-1) => {
                writeln!(self.output, "Freeing all allocated blocks...")?;
                for ptr in std::mem::take(&mut self.allocations) {
                    self.release(ptr)?;
                }
                writeln!(self.output, "All blocks freed.")?;
            }
            Reply::Number(index) => {
                match usize::try_from(index).ok().filter(|&i| i < self.allocations.len()) {
                    Some(index) => {
                        // Removing keeps the remaining entries in order,
                        // so indices above this one shift down by one.
                        let ptr = self.allocations.remove(index);
                        self.release(ptr)?;
                    }
                    None => writeln!(self.output, "Invalid index.")?,
                }
            }
            Reply::Invalid => writeln!(self.output, "Invalid input.")?,
            Reply::Eof => return Ok(false),
        }
        Ok(true)
    }

    fn release(&mut self, ptr: Pointer) -> Result<()> {
        match self.heap.release(ptr) {
            Ok(()) => writeln!(self.output, "Freed memory at {ptr}")?,
            Err(e) => writeln!(self.output, "Warning: {e}")?,
        }
        Ok(())
    }

    fn change_strategy(&mut self) -> Result<bool> {
        writeln!(self.output, "Change Allocation Strategy:")?;
        for (i, strategy) in Strategy::ALL.iter().enumerate() {
            writeln!(self.output, "{}. {strategy}", i + 1)?;
        }
        self.prompt(&format!("Enter strategy choice (1-{}): ", Strategy::ALL.len()))?;

        match self.read_number()? {
            Reply::Number(choice) => {
                let strategy = usize::try_from(choice)
                    .ok()
                    .and_then(|choice| choice.checked_sub(1))
                    .and_then(|index| Strategy::ALL.get(index).copied());
                match strategy {
                    Some(strategy) => {
                        self.heap.set_strategy(strategy);
                        writeln!(self.output, "Allocation strategy changed to: {strategy}")?;
                    }
                    None => writeln!(self.output, "Invalid strategy choice.")?,
                }
            }
            Reply::Invalid => writeln!(self.output, "Invalid input.")?,
            Reply::Eof => return Ok(false),
        }
        Ok(true)
    }

    fn prompt(&mut self, text: &str) -> Result<()> {
        write!(self.output, "{text}")?;
        self.output.flush()?;
        Ok(())
    }

    /// Read the next number from the input. A word that is not a number
    /// throws away the rest of its line.
    fn read_number(&mut self) -> Result<Reply> {
        while self.pending.is_empty() {
            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(Reply::Eof);
            }
            self.pending
                .extend(line.split_whitespace().map(str::to_owned));
        }

        let Some(word) = self.pending.pop_front() else {
            return Ok(Reply::Eof);
        };
        match word.parse() {
            Ok(number) => Ok(Reply::Number(number)),
            Err(_) => {
                debug!("Discarding input line after {word:?}.");
                self.pending.clear();
                Ok(Reply::Invalid)
            }
        }
    }
}

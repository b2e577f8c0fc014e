//! An in-memory model of AT45 chips sharing one SPI bus, for unit tests.
//!
//! The model decodes frames byte by byte like the real part: buffer reads and
//! writes stream while chip-select is held, page/erase commands run when
//! chip-select is released. Main memory behaves like NOR flash, so a program
//! without built-in erase can only clear bits.

use crate::command::{Opcode, CHIP_ERASE};
use crate::{address, Config};
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;
use std::cell::RefCell;
use std::collections::HashMap;
use std::convert::Infallible;
use std::rc::Rc;

const DENSITY_16M: u8 = 0b1011 << 2;

#[derive(Debug, Default)]
struct Chip {
    selected: bool,
    frame: Vec<u8>,
    buffers: [Vec<u8>; 2],
    pages: HashMap<u16, Vec<u8>>,
    frames: Vec<Vec<u8>>,
    absent: bool,
    stuck: bool,
    busy_polls: u32,
    program_polls: u32,
}

#[derive(Debug)]
struct State {
    config: Config,
    chips: Vec<Chip>,
    /// Completed frames of all chips in bus order.
    history: Vec<(usize, Vec<u8>)>,
    contention: bool,
}

impl State {
    fn page_size(&self) -> usize {
        usize::from(self.config.page_size())
    }

    fn page_of(&self, frame: &[u8]) -> u16 {
        let page = address::decode([frame[1], frame[2], frame[3]], self.config.page_shift());
        assert!(self.config.contains(page), "page {} out of range", page);
        page
    }

    fn status(&mut self, index: usize) -> u8 {
        let binary = self.config.page_size().is_power_of_two() as u8;
        let chip = &mut self.chips[index];
        let ready = if chip.stuck {
            false
        } else if chip.busy_polls > 0 {
            chip.busy_polls -= 1;
            false
        } else {
            true
        };
        (ready as u8) << 7 | DENSITY_16M | binary
    }

    /// Handles byte `i` of the current frame on chip `index`, returning MISO.
    fn exchange(&mut self, index: usize, mosi: u8) -> u8 {
        let page_size = self.page_size();
        if self.chips[index].absent {
            return 0xFF;
        }
        self.chips[index].frame.push(mosi);
        let frame = &self.chips[index].frame;
        let i = frame.len() - 1;
        let opcode = frame[0];
        let offset = |frame: &[u8]| usize::from(frame[2]) << 8 | usize::from(frame[3]);

        if opcode == Opcode::ReadStatus as u8 && i >= 1 {
            return self.status(index);
        }
        if opcode == Opcode::ReadId as u8 && (1..=4).contains(&i) {
            return [0x1F, 0x26, 0x00, 0x00][i - 1];
        }
        if opcode == Opcode::ReadSecurity as u8 && i >= 4 {
            return (i - 4) as u8;
        }
        if (opcode == Opcode::Buf1Read as u8 || opcode == Opcode::Buf2Read as u8) && i >= 5 {
            let buffer = (opcode == Opcode::Buf2Read as u8) as usize;
            let at = (offset(frame) + i - 5) % page_size;
            return self.chips[index].buffers[buffer][at];
        }
        if (opcode == Opcode::Buf1Write as u8 || opcode == Opcode::Buf2Write as u8) && i >= 4 {
            let buffer = (opcode == Opcode::Buf2Write as u8) as usize;
            let at = (offset(frame) + i - 4) % page_size;
            self.chips[index].buffers[buffer][at] = mosi;
        }
        0
    }

    /// Runs the command in the frame that just ended on chip `index`.
    fn execute(&mut self, index: usize) {
        let frame = std::mem::take(&mut self.chips[index].frame);
        if frame.is_empty() {
            return;
        }
        let page_size = self.page_size();
        let erased = vec![0xFF; page_size];
        let opcode = frame[0];
        let mut programmed = true;

        match opcode {
            op if op == Opcode::PageToBuf1 as u8 || op == Opcode::PageToBuf2 as u8 => {
                let page = self.page_of(&frame);
                let chip = &mut self.chips[index];
                let data = chip.pages.get(&page).cloned().unwrap_or(erased);
                chip.buffers[(op == Opcode::PageToBuf2 as u8) as usize] = data;
            }
            op if op == Opcode::Buf1ToPageErase as u8 || op == Opcode::Buf2ToPageErase as u8 => {
                let page = self.page_of(&frame);
                let chip = &mut self.chips[index];
                let data = chip.buffers[(op == Opcode::Buf2ToPageErase as u8) as usize].clone();
                chip.pages.insert(page, data);
            }
            op if op == Opcode::Buf1ToPage as u8 || op == Opcode::Buf2ToPage as u8 => {
                let page = self.page_of(&frame);
                let chip = &mut self.chips[index];
                let buffer = chip.buffers[(op == Opcode::Buf2ToPage as u8) as usize].clone();
                let cells = chip.pages.entry(page).or_insert(erased);
                for (cell, bit) in cells.iter_mut().zip(buffer) {
                    *cell &= bit;
                }
            }
            op if op == Opcode::PageErase as u8 => {
                let page = self.page_of(&frame);
                self.chips[index].pages.remove(&page);
            }
            op if op == Opcode::SectorErase as u8 => {
                let per_sector = self.config.pages_per_sector();
                let sector = self.page_of(&frame) / per_sector;
                self.chips[index]
                    .pages
                    .retain(|page, _| page / per_sector != sector);
            }
            _ if frame == CHIP_ERASE => self.chips[index].pages.clear(),
            _ => programmed = false,
        }

        let chip = &mut self.chips[index];
        if programmed {
            chip.busy_polls = chip.program_polls;
        }
        chip.frames.push(frame.clone());
        self.history.push((index, frame));
    }
}

/// Handle to the simulated bus, used by tests to inspect and poke the chips.
#[derive(Debug, Clone)]
pub struct Sim(Rc<RefCell<State>>);

/// The SPI master side of the simulated bus.
#[derive(Debug)]
pub struct SimSpi(Rc<RefCell<State>>);

/// Chip-select pin of one simulated chip.
#[derive(Debug)]
pub struct SimCs {
    state: Rc<RefCell<State>>,
    index: usize,
}

impl Sim {
    pub fn new(chips: usize, config: Config) -> Self {
        let page_size = usize::from(config.page_size());
        let chips = (0..chips)
            .map(|_| Chip {
                buffers: [vec![0; page_size], vec![0; page_size]],
                ..Chip::default()
            })
            .collect();
        Sim(Rc::new(RefCell::new(State {
            config,
            chips,
            history: Vec::new(),
            contention: false,
        })))
    }

    pub fn spi(&self) -> SimSpi {
        SimSpi(self.0.clone())
    }

    pub fn cs(&self, index: usize) -> SimCs {
        SimCs {
            state: self.0.clone(),
            index,
        }
    }

    pub fn cs_array<const N: usize>(&self) -> [SimCs; N] {
        let mut index = 0;
        [(); N].map(|_| {
            index += 1;
            self.cs(index - 1)
        })
    }

    /// Nothing answers on this chip-select; MISO floats high.
    pub fn set_absent(&self, index: usize, absent: bool) {
        self.0.borrow_mut().chips[index].absent = absent;
    }

    /// The chip never reports ready again.
    pub fn set_stuck(&self, index: usize, stuck: bool) {
        self.0.borrow_mut().chips[index].stuck = stuck;
    }

    /// The next `polls` status reads report busy.
    pub fn set_busy_polls(&self, index: usize, polls: u32) {
        self.0.borrow_mut().chips[index].busy_polls = polls;
    }

    /// Every program or erase keeps the chip busy for `polls` status reads.
    pub fn set_program_polls(&self, index: usize, polls: u32) {
        self.0.borrow_mut().chips[index].program_polls = polls;
    }

    pub fn is_selected(&self, index: usize) -> bool {
        self.0.borrow().chips[index].selected
    }

    /// Whether two chips were ever selected at the same time.
    pub fn contention(&self) -> bool {
        self.0.borrow().contention
    }

    /// Completed frames sent to chip `index`.
    pub fn frames(&self, index: usize) -> Vec<Vec<u8>> {
        self.0.borrow().chips[index].frames.clone()
    }

    /// Number of completed frames with `opcode` sent to chip `index`.
    pub fn count(&self, index: usize, opcode: u8) -> usize {
        self.0.borrow().chips[index]
            .frames
            .iter()
            .filter(|frame| frame[0] == opcode)
            .count()
    }

    /// `(chip, page)` of every frame with one of `opcodes`, in bus order.
    pub fn page_commands(&self, opcodes: &[u8]) -> Vec<(usize, u16)> {
        let state = self.0.borrow();
        state
            .history
            .iter()
            .filter(|(_, frame)| opcodes.contains(&frame[0]))
            .map(|(index, frame)| (*index, state.page_of(frame)))
            .collect()
    }

    /// Contents of a main memory page, `0xFF` when erased.
    pub fn page(&self, index: usize, page: u16) -> Vec<u8> {
        let state = self.0.borrow();
        state.chips[index]
            .pages
            .get(&page)
            .cloned()
            .unwrap_or_else(|| vec![0xFF; state.page_size()])
    }

    pub fn set_page(&self, index: usize, page: u16, data: &[u8]) {
        let mut state = self.0.borrow_mut();
        assert_eq!(data.len(), state.page_size());
        state.chips[index].pages.insert(page, data.to_vec());
    }

    /// Number of pages that are not erased.
    pub fn written_pages(&self, index: usize) -> usize {
        self.0.borrow().chips[index].pages.len()
    }

    pub fn buffer(&self, index: usize, buffer: usize) -> Vec<u8> {
        self.0.borrow().chips[index].buffers[buffer].clone()
    }
}

impl Transfer<u8> for SimSpi {
    type Error = Infallible;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], Infallible> {
        let mut state = self.0.borrow_mut();
        for word in words.iter_mut() {
            let selected: Vec<usize> = (0..state.chips.len())
                .filter(|&index| state.chips[index].selected)
                .collect();
            *word = match selected.as_slice() {
                [index] => state.exchange(*index, *word),
                [] => 0xFF,
                _ => {
                    state.contention = true;
                    0xFF
                }
            };
        }
        Ok(words)
    }
}

impl OutputPin for SimCs {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Infallible> {
        let mut state = self.state.borrow_mut();
        let chip = &mut state.chips[self.index];
        if !chip.selected {
            chip.selected = true;
            chip.frame.clear();
        }
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        let mut state = self.state.borrow_mut();
        if state.chips[self.index].selected {
            state.chips[self.index].selected = false;
            state.execute(self.index);
        }
        Ok(())
    }
}

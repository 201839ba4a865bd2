// layout.rs - Memory layout planner
//
// The data stack doubles as the machine's flat memory:
//
//   0 .. origin                 global variables, declaration order
//   origin ..                   live operand cells
//   local_area_base .. +1024    local variable window, shared by all words
//   tib .. +80                  terminal input buffer
//   pad .. +64                  scratch pad, last cells of the array

use crate::config::CompilerConfig;
use crate::error::CompileError;
use crate::program::GlobalVariable;
use log::debug;

pub const PAD_CELLS: usize = 64;
pub const TIB_CELLS: usize = 80;
pub const LOCAL_AREA_CELLS: usize = 1024;
pub const RESERVED_CELLS: usize = PAD_CELLS + TIB_CELLS + LOCAL_AREA_CELLS;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryLayout {
    pub data_stack_size: i32,
    pub return_stack_size: i32,
    pub pad: i32,
    pub tib: i32,
    pub local_area_base: i32,
    /// Initial (empty) data stack index, just past the globals
    pub data_origin: i32,
    pub return_origin: i32,
    /// Address of each global, in declaration order
    pub global_addresses: Vec<i32>,
}

impl MemoryLayout {
    pub fn plan(
        config: &CompilerConfig,
        globals: &[GlobalVariable],
    ) -> Result<MemoryLayout, CompileError> {
        config.validate()?;

        let size = config.data_stack_size;
        let pad = size - PAD_CELLS;
        let tib = pad - TIB_CELLS;
        let local_area_base = tib - LOCAL_AREA_CELLS;

        let mut origin = 0usize;
        let mut global_addresses = Vec::with_capacity(globals.len());
        for global in globals {
            if global.size == 0 {
                return Err(CompileError::InvalidConfig(format!(
                    "variable {} has no cells",
                    global.name
                )));
            }
            global_addresses.push(origin as i32);
            origin += global.size;
            if origin > local_area_base {
                return Err(CompileError::InvalidConfig(format!(
                    "variable {} does not fit below the local variable window at {}",
                    global.name, local_area_base
                )));
            }
        }

        let layout = MemoryLayout {
            data_stack_size: size as i32,
            return_stack_size: config.return_stack_size as i32,
            pad: pad as i32,
            tib: tib as i32,
            local_area_base: local_area_base as i32,
            data_origin: origin as i32,
            return_origin: 0,
            global_addresses,
        };

        debug!(
            "layout: data={} return={} origin={} locals={} tib={} pad={}",
            layout.data_stack_size,
            layout.return_stack_size,
            layout.data_origin,
            layout.local_area_base,
            layout.tib,
            layout.pad
        );

        Ok(layout)
    }

    /// Address of the `index`-th local of whichever word is being compiled
    pub fn local_address(&self, index: usize) -> i32 {
        self.local_area_base + index as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_regions() {
        let config = CompilerConfig::new().with_stack_sizes(4096, 256);
        let layout = MemoryLayout::plan(&config, &[]).unwrap();
        assert_eq!(layout.pad, 4096 - 64);
        assert_eq!(layout.tib, 4096 - 64 - 80);
        assert_eq!(layout.local_area_base, 4096 - 64 - 80 - 1024);
        assert_eq!(layout.data_origin, 0);
        assert_eq!(layout.return_origin, 0);
    }

    #[test]
    fn test_globals_advance_origin() {
        let config = CompilerConfig::default();
        let globals = vec![
            GlobalVariable::new("A", 1),
            GlobalVariable::new("BUF", 10),
            GlobalVariable::new("B", 2),
        ];
        let layout = MemoryLayout::plan(&config, &globals).unwrap();
        assert_eq!(layout.global_addresses, vec![0, 1, 11]);
        assert_eq!(layout.data_origin, 13);
    }

    #[test]
    fn test_globals_must_fit() {
        let config = CompilerConfig::new().with_stack_sizes(RESERVED_CELLS + 4, 16);
        let globals = vec![GlobalVariable::new("BIG", 5)];
        assert!(MemoryLayout::plan(&config, &globals).is_err());
    }

    #[test]
    fn test_zero_sized_global_rejected() {
        let config = CompilerConfig::default();
        let globals = vec![GlobalVariable::new("NOTHING", 0)];
        assert!(matches!(
            MemoryLayout::plan(&config, &globals),
            Err(CompileError::InvalidConfig(_))
        ));
    }
}

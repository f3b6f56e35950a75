// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Per-message stage timestamps.
//!
//! The [build_stage_timing](crate::build_stage_timing) macro generates the
//! timing record together with a [`Stage`] enum so that a stage can be
//! stamped on every message of a flit without naming the field directly.

pub use paste::paste;

#[macro_export]
/// Macro helper for building the stage timing record.
///
/// Each listed field becomes a `Tick` member of the record and a variant of
/// the `Stage` enum (in `CamelCase`).
macro_rules! build_stage_timing {
    ($record:ident; $($field:ident),+ $(,)*) => {
        $crate::timing::paste! {

        /// Points in the life of a transaction that are timestamped.
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub enum Stage {
            $(
            #[doc=concat!("The `", stringify!($field), "` timestamp.")]
            [< $field:camel >],
            )+
        }

        /// Tick at which each stage was reached. Zero means not reached.
        #[derive(Clone, Debug, Default, PartialEq)]
        pub struct $record {
            /// True for transactions that started as a write.
            pub is_write: bool,
            $(
            pub $field: cxl_engine::types::Tick,
            )+
        }

        impl $record {
            /// Get the tick recorded for a stage.
            #[must_use]
            pub fn get(&self, stage: Stage) -> cxl_engine::types::Tick {
                match stage {
                    $(Stage::[< $field:camel >] => self.$field,)+
                }
            }

            /// Record the tick at which a stage was reached.
            pub fn set(&mut self, stage: Stage, tick: cxl_engine::types::Tick) {
                match stage {
                    $(Stage::[< $field:camel >] => self.$field = tick,)+
                }
            }
        }

        impl std::fmt::Display for $record {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, "{}", u8::from(self.is_write))?;
                $(
                write!(f, ",{}", self.$field)?;
                )+
                Ok(())
            }
        }

        } // paste!
    };
}

build_stage_timing!(MessageTiming;
    created,
    packed,
    transmitted,
    switch_ds_rx,
    switch_ds_tx,
    received,
    unpacked,
    at_memory,
    memory_complete,
    repacked,
    retransmitted,
    switch_us_rx,
    switch_us_tx,
    resp_received,
    resp_unpacked,
    complete,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_by_stage() {
        let mut timing = MessageTiming::default();
        timing.set(Stage::SwitchDsRx, 120);
        timing.set(Stage::MemoryComplete, 900);
        assert_eq!(timing.switch_ds_rx, 120);
        assert_eq!(timing.get(Stage::MemoryComplete), 900);
        assert_eq!(timing.get(Stage::Created), 0);
    }

    #[test]
    fn display_is_csv() {
        let timing = MessageTiming {
            is_write: true,
            created: 5,
            ..MessageTiming::default()
        };
        assert!(timing.to_string().starts_with("1,5,0,"));
        assert_eq!(timing.to_string().split(',').count(), 17);
    }
}

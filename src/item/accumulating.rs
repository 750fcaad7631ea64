use crate::bundle::Bundle;
use crate::item::{ActivationCtx, DataItem, DataItemSpec, ItemValue};
use anyhow::bail;

const SAVED_VALUE_KEY: &str = "value";
const SAVED_SOURCE_KEY: &str = "source";

/// A read-only data item accumulating increases of a non-negative numeric
/// source item, e.g. turning a resettable meter reading into a total.
///
/// The accumulated value and the last seen source value are persisted, so
/// the total survives restarts. Requires a configured persistent storage.
pub struct AccumulatingDataItem {
    source: DataItem<i64>,
    source_mark: i64,
    accumulated: Option<i64>,
}

impl AccumulatingDataItem {
    pub fn new(source: &DataItem<i64>) -> Self {
        Self {
            source: source.clone(),
            source_mark: 0,
            accumulated: None,
        }
    }

    /// Folds the current source value into the running total. A source
    /// value below the last mark means the source was reset; the whole new
    /// value counts as an increase then.
    fn accumulate(&mut self) {
        let Some(value) = self.source.value() else {
            return;
        };
        if value < 0 {
            return;
        }

        match self.accumulated {
            None => {
                self.source_mark = value;
                self.accumulated = Some(value);
            }
            Some(total) => {
                if value < self.source_mark {
                    self.accumulated = Some(total + value);
                } else {
                    let increase = value - self.source_mark;
                    if increase > 0 {
                        self.accumulated = Some(total + increase);
                    }
                }
                self.source_mark = value;
            }
        }
    }
}

impl DataItemSpec<i64> for AccumulatingDataItem {
    fn read_only(&self) -> bool {
        true
    }

    fn on_activate(&mut self, ctx: &mut ActivationCtx<'_>, saved: &Bundle) -> anyhow::Result<()> {
        if !ctx.application().has_persistent_storage() {
            bail!("persistent storage is required but not configured");
        }

        ctx.set_dependencies(&[self.source.item_ref()]);

        if saved.contains_key(SAVED_SOURCE_KEY) && saved.contains_key(SAVED_VALUE_KEY) {
            let source_mark = saved.get_long(SAVED_SOURCE_KEY, -1);
            let total = saved.get_long(SAVED_VALUE_KEY, -1);
            if source_mark >= 0 && total >= 0 {
                self.source_mark = source_mark;
                self.accumulated = Some(total);
                ctx.request_update();
            } else {
                tracing::warn!(
                    "[AccumulatingDataItem] incompatible saved state found in the persistent storage, loading skipped"
                );
            }
        }
        Ok(())
    }

    fn on_synchronize(&mut self) -> anyhow::Result<Option<i64>> {
        self.accumulate();
        Ok(self.accumulated)
    }

    fn on_save_state(&mut self, out: &mut Bundle) -> anyhow::Result<()> {
        if let Some(total) = self.accumulated {
            out.put_long(SAVED_SOURCE_KEY, self.source_mark);
            out.put_long(SAVED_VALUE_KEY, total);
        }
        Ok(())
    }
}

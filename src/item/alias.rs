use crate::item::{ActivationCtx, ChangeOutcome, DataItem, DataItemSpec, ItemValue};
use crate::bundle::Bundle;

/// An alias of another data item.
///
/// The alias mirrors the source value (declared as a dependency, so it
/// follows every change) and forwards change requests to the source.
pub struct AliasDataItem<T: ItemValue> {
    source: DataItem<T>,
}

impl<T: ItemValue> AliasDataItem<T> {
    pub fn new(source: &DataItem<T>) -> Self {
        Self {
            source: source.clone(),
        }
    }
}

impl<T: ItemValue> DataItemSpec<T> for AliasDataItem<T> {
    fn read_only(&self) -> bool {
        self.source.is_read_only()
    }

    fn on_activate(&mut self, ctx: &mut ActivationCtx<'_>, _saved: &Bundle) -> anyhow::Result<()> {
        ctx.set_dependencies(&[self.source.item_ref()]);
        Ok(())
    }

    fn on_synchronize(&mut self) -> anyhow::Result<Option<T>> {
        Ok(self.source.value())
    }

    fn on_change_requested(&mut self, new_value: T) -> anyhow::Result<ChangeOutcome> {
        self.source.request_change(new_value)?;
        Ok(ChangeOutcome::Deferred)
    }
}

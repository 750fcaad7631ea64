use crate::bundle::Bundle;
use crate::item::{ActivationCtx, ChangeOutcome, DataItemSpec, ItemValue};
use anyhow::bail;
use serde::Serialize;
use serde::de::DeserializeOwned;

const SAVED_VALUE_KEY: &str = "value";

type Encode<T> = fn(&T) -> serde_json::Result<serde_json::Value>;
type Decode<T> = fn(&serde_json::Value) -> Option<T>;

/// A writable local value cell.
///
/// Change requests become the new value immediately. The persistent flavor
/// restores the last value on activation and writes it on every state
/// save; it requires a configured persistent storage and a serde-capable
/// value type.
pub struct LocalDataItem<T: ItemValue> {
    desired: Option<T>,
    codec: Option<(Encode<T>, Decode<T>)>,
}

impl<T: ItemValue> LocalDataItem<T> {
    /// A local item whose value does not survive restarts.
    pub fn ephemeral() -> Self {
        Self {
            desired: None,
            codec: None,
        }
    }
}

impl<T: ItemValue + Serialize + DeserializeOwned> LocalDataItem<T> {
    /// A local item whose value is saved and restored across launches.
    pub fn persistent() -> Self {
        Self {
            desired: None,
            codec: Some((
                |value| serde_json::to_value(value),
                |raw| serde_json::from_value(raw.clone()).ok(),
            )),
        }
    }
}

impl<T: ItemValue> DataItemSpec<T> for LocalDataItem<T> {
    fn on_activate(&mut self, ctx: &mut ActivationCtx<'_>, saved: &Bundle) -> anyhow::Result<()> {
        let Some((_, decode)) = self.codec else {
            return Ok(());
        };

        if !ctx.application().has_persistent_storage() {
            bail!("persistent storage is required but not configured");
        }

        let Some(raw) = saved.opaque(SAVED_VALUE_KEY) else {
            return Ok(());
        };
        match decode(raw) {
            Some(value) => {
                self.desired = Some(value);
                ctx.request_update();
            }
            None => {
                tracing::warn!(
                    "[LocalDataItem] incompatible saved value found in the persistent storage, loading skipped"
                );
            }
        }
        Ok(())
    }

    fn on_synchronize(&mut self) -> anyhow::Result<Option<T>> {
        Ok(self.desired.clone())
    }

    fn on_change_requested(&mut self, new_value: T) -> anyhow::Result<ChangeOutcome> {
        self.desired = Some(new_value);
        Ok(ChangeOutcome::Synchronize)
    }

    fn on_save_state(&mut self, out: &mut Bundle) -> anyhow::Result<()> {
        if let Some((encode, _)) = self.codec
            && let Some(value) = &self.desired
        {
            out.put_opaque_value(SAVED_VALUE_KEY, encode(value)?);
        }
        Ok(())
    }
}

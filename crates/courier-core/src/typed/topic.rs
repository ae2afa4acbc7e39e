//! Topic trait - payload 型と topic 名の対応付け

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Topic は topic 名と payload 型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct ModelSynced {
///     model_code: String,
/// }
///
/// impl Topic for ModelSynced {
///     const TOPIC: &'static str = "catalog.model.synced";
/// }
/// ```
///
/// # Trait Bounds
/// - `Serialize`: TaskRecord の payload への保存のため
/// - `DeserializeOwned`: payload からの復元のため
/// - `Send + Sync + 'static`: Arc に格納して worker 間で共有するため
pub trait Topic: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TOPIC: &'static str;
}

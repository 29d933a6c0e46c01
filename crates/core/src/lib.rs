pub mod collection;
pub mod filter;
pub mod group;
pub mod money;
pub mod period;
pub mod record;
pub mod stats;

pub use collection::{RecordCollection, RecordView, SortKey, StoreError};
pub use filter::{Direction, FilterSpec, MoneyRange};
pub use group::{GroupBy, GroupKey};
pub use money::Money;
pub use period::{DateFilter, DateFilterError, DateRange, Period};
pub use record::{Record, RecordKey, UnvalidatedRecord, ValidationError};
pub use stats::{EmptyCollectionError, FrequencyStats, Statistics, ValueStats};

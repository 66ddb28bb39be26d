use std::str::FromStr;

use serde::{Deserialize, Serialize};
#[cfg(any(test, feature = "test-helpers"))]
use services::types::{B256, QueueOrigin, TransactionSignature};
use services::types::{
    Address, Bytes, DecodedTransaction, TransactionBatchEntry, TransactionEntry, U256,
};
use sqlx::types::{BigDecimal, Json};

macro_rules! bail {
    ($msg: literal, $($args: expr),*) => {
        return Err($crate::error::Error::Conversion(format!($msg, $($args),*)))
    };
}

#[derive(sqlx::FromRow)]
pub struct TransactionBatch {
    pub batch_index: i64,
    pub root: Vec<u8>,
    pub size: i64,
    pub prev_total_elements: i64,
    pub extra_data: Vec<u8>,
    pub l1_block_number: i64,
    pub l1_timestamp: i64,
    pub submitter: Vec<u8>,
    pub l1_transaction_hash: Vec<u8>,
}

impl TryFrom<TransactionBatchEntry> for TransactionBatch {
    type Error = crate::error::Error;

    fn try_from(value: TransactionBatchEntry) -> Result<Self, Self::Error> {
        Ok(Self {
            batch_index: to_i64(value.index, "batch_index")?,
            root: value.root.to_vec(),
            size: to_i64(value.size, "size")?,
            prev_total_elements: to_i64(value.prev_total_elements, "prev_total_elements")?,
            extra_data: value.extra_data.to_vec(),
            l1_block_number: to_i64(value.block_number, "l1_block_number")?,
            l1_timestamp: to_i64(value.timestamp, "l1_timestamp")?,
            submitter: value.submitter.to_vec(),
            l1_transaction_hash: value.l1_transaction_hash.to_vec(),
        })
    }
}

// Reading rows back into domain types is only needed to verify what was written.
#[cfg(any(test, feature = "test-helpers"))]
impl TryFrom<TransactionBatch> for TransactionBatchEntry {
    type Error = crate::error::Error;

    fn try_from(value: TransactionBatch) -> Result<Self, Self::Error> {
        Ok(Self {
            index: to_u64(value.batch_index, "batch_index")?,
            root: to_b256(&value.root, "root")?,
            size: to_u64(value.size, "size")?,
            prev_total_elements: to_u64(value.prev_total_elements, "prev_total_elements")?,
            extra_data: Bytes::from(value.extra_data),
            block_number: to_u64(value.l1_block_number, "l1_block_number")?,
            timestamp: to_u64(value.l1_timestamp, "l1_timestamp")?,
            submitter: to_address(&value.submitter, "submitter")?,
            l1_transaction_hash: to_b256(&value.l1_transaction_hash, "l1_transaction_hash")?,
        })
    }
}

/// Shape of the `decoded` JSON column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedTransactionJson {
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub value: U256,
    pub target: Option<Address>,
    pub data: Bytes,
    pub v: u8,
    pub r: U256,
    pub s: U256,
}

impl From<DecodedTransaction> for DecodedTransactionJson {
    fn from(value: DecodedTransaction) -> Self {
        Self {
            nonce: value.nonce,
            gas_price: U256::from(value.gas_price),
            gas_limit: value.gas_limit,
            value: value.value,
            target: value.target,
            data: value.data,
            v: value.signature.v,
            r: value.signature.r,
            s: value.signature.s,
        }
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl TryFrom<DecodedTransactionJson> for DecodedTransaction {
    type Error = crate::error::Error;

    fn try_from(value: DecodedTransactionJson) -> Result<Self, Self::Error> {
        let Ok(gas_price) = u128::try_from(value.gas_price) else {
            bail!("`gas_price` {} from db does not fit in a u128", value.gas_price);
        };

        Ok(Self {
            nonce: value.nonce,
            gas_price,
            gas_limit: value.gas_limit,
            value: value.value,
            target: value.target,
            data: value.data,
            signature: TransactionSignature {
                v: value.v,
                r: value.r,
                s: value.s,
            },
        })
    }
}

#[derive(sqlx::FromRow)]
pub struct DbTransactionEntry {
    pub element_index: i64,
    pub batch_index: i64,
    pub block_number: i64,
    pub l2_timestamp: i64,
    pub gas_limit: i64,
    pub target: Option<Vec<u8>>,
    pub origin: Option<Vec<u8>>,
    pub data: Vec<u8>,
    pub queue_origin: String,
    pub value: BigDecimal,
    pub queue_index: Option<i64>,
    pub decoded: Option<Json<DecodedTransactionJson>>,
    pub confirmed: bool,
}

impl TryFrom<TransactionEntry> for DbTransactionEntry {
    type Error = crate::error::Error;

    fn try_from(value: TransactionEntry) -> Result<Self, Self::Error> {
        Ok(Self {
            element_index: to_i64(value.index, "element_index")?,
            batch_index: to_i64(value.batch_index, "batch_index")?,
            block_number: to_i64(value.block_number, "block_number")?,
            l2_timestamp: to_i64(value.timestamp, "l2_timestamp")?,
            gas_limit: to_i64(value.gas_limit, "gas_limit")?,
            target: value.target.map(|a| a.to_vec()),
            origin: value.origin.map(|a| a.to_vec()),
            data: value.data.to_vec(),
            queue_origin: value.queue_origin.to_string(),
            value: u256_to_bigdecimal(value.value)?,
            queue_index: value
                .queue_index
                .map(|q| to_i64(q, "queue_index"))
                .transpose()?,
            decoded: value.decoded.map(|d| Json(d.into())),
            confirmed: value.confirmed,
        })
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl TryFrom<DbTransactionEntry> for TransactionEntry {
    type Error = crate::error::Error;

    fn try_from(value: DbTransactionEntry) -> Result<Self, Self::Error> {
        let queue_origin = match value.queue_origin.as_str() {
            "sequencer" => QueueOrigin::Sequencer,
            "l1" => QueueOrigin::Queued,
            other => bail!(
                "Unknown `queue_origin` {:?} for element {} in db",
                other,
                value.element_index
            ),
        };

        Ok(Self {
            index: to_u64(value.element_index, "element_index")?,
            batch_index: to_u64(value.batch_index, "batch_index")?,
            block_number: to_u64(value.block_number, "block_number")?,
            timestamp: to_u64(value.l2_timestamp, "l2_timestamp")?,
            gas_limit: to_u64(value.gas_limit, "gas_limit")?,
            target: value
                .target
                .map(|a| to_address(&a, "target"))
                .transpose()?,
            origin: value
                .origin
                .map(|a| to_address(&a, "origin"))
                .transpose()?,
            data: Bytes::from(value.data),
            queue_origin,
            value: bigdecimal_to_u256(value.value)?,
            queue_index: value
                .queue_index
                .map(|q| to_u64(q, "queue_index"))
                .transpose()?,
            decoded: value
                .decoded
                .map(|Json(d)| DecodedTransaction::try_from(d))
                .transpose()?,
            confirmed: value.confirmed,
        })
    }
}

pub(crate) fn to_i64(value: u64, column: &str) -> Result<i64, crate::error::Error> {
    let Ok(value) = i64::try_from(value) else {
        bail!("`{}` value {} does not fit the db column", column, value);
    };
    Ok(value)
}

pub(crate) fn to_u64(value: i64, column: &str) -> Result<u64, crate::error::Error> {
    let Ok(value) = u64::try_from(value) else {
        bail!("Expected a non-negative `{}`, but got: {} from db", column, value);
    };
    Ok(value)
}

#[cfg(any(test, feature = "test-helpers"))]
fn to_b256(bytes: &[u8], column: &str) -> Result<B256, crate::error::Error> {
    let Ok(hash) = B256::try_from(bytes) else {
        bail!("Expected 32 bytes for `{}`, but got: {:?} from db", column, bytes);
    };
    Ok(hash)
}

#[cfg(any(test, feature = "test-helpers"))]
fn to_address(bytes: &[u8], column: &str) -> Result<Address, crate::error::Error> {
    let Ok(address) = Address::try_from(bytes) else {
        bail!("Expected 20 bytes for `{}`, but got: {:?} from db", column, bytes);
    };
    Ok(address)
}

pub(crate) fn u256_to_bigdecimal(value: U256) -> Result<BigDecimal, crate::error::Error> {
    let Ok(decimal) = BigDecimal::from_str(&value.to_string()) else {
        bail!("Could not represent {} as a decimal", value);
    };
    Ok(decimal)
}

// Assumes the column holds whole numbers, as enforced by NUMERIC(78, 0)
#[cfg(any(test, feature = "test-helpers"))]
pub(crate) fn bigdecimal_to_u256(value: BigDecimal) -> Result<U256, crate::error::Error> {
    if !value.is_integer() {
        bail!("Expected whole number, got fractional from db: {}", value);
    }

    let digits = value.with_scale(0).to_string();
    let Ok(result) = U256::from_str_radix(&digits, 10) else {
        bail!("Value {} from db does not fit in a U256", value);
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use super::*;

    fn batch() -> TransactionBatchEntry {
        TransactionBatchEntry {
            index: 4,
            root: B256::repeat_byte(1),
            size: 10,
            prev_total_elements: 40,
            extra_data: Bytes::from_static(b"extra"),
            block_number: 100,
            timestamp: 1_700_000_000,
            submitter: Address::repeat_byte(2),
            l1_transaction_hash: B256::repeat_byte(3),
        }
    }

    fn sequenced_entry() -> TransactionEntry {
        TransactionEntry {
            index: 41,
            batch_index: 4,
            block_number: 99,
            timestamp: 1_699_999_999,
            gas_limit: 8_000_000,
            target: Some(Address::repeat_byte(5)),
            origin: None,
            data: Bytes::from_static(&[1, 2, 3]),
            queue_origin: QueueOrigin::Sequencer,
            value: U256::MAX,
            queue_index: None,
            decoded: Some(DecodedTransaction {
                nonce: 1,
                gas_price: u128::MAX,
                gas_limit: 21_000,
                value: U256::MAX,
                target: None,
                data: Bytes::new(),
                signature: TransactionSignature {
                    v: 1,
                    r: U256::from(7),
                    s: U256::from(8),
                },
            }),
            confirmed: true,
        }
    }

    #[test]
    fn batch_survives_the_db() {
        let row = TransactionBatch::try_from(batch()).unwrap();

        assert_eq!(TransactionBatchEntry::try_from(row).unwrap(), batch());
    }

    #[test]
    fn transaction_entry_survives_the_db() {
        let row = DbTransactionEntry::try_from(sequenced_entry()).unwrap();

        assert_eq!(row.queue_origin, "sequencer");
        assert_eq!(TransactionEntry::try_from(row).unwrap(), sequenced_entry());
    }

    #[test]
    fn indices_beyond_the_column_range_are_rejected() {
        let mut entry = sequenced_entry();
        entry.index = u64::MAX;

        let err = DbTransactionEntry::try_from(entry).err().unwrap();

        assert!(err.to_string().contains("element_index"));
    }

    #[test]
    fn negative_heights_from_db_are_rejected() {
        let mut row = TransactionBatch::try_from(batch()).unwrap();
        row.l1_block_number = -1;

        assert!(TransactionBatchEntry::try_from(row).is_err());
    }

    #[test]
    fn short_hashes_from_db_are_rejected() {
        let mut row = TransactionBatch::try_from(batch()).unwrap();
        row.root = vec![0; 31];

        assert!(TransactionBatchEntry::try_from(row).is_err());
    }

    #[test]
    fn unknown_queue_origin_is_rejected() {
        let mut row = DbTransactionEntry::try_from(sequenced_entry()).unwrap();
        row.queue_origin = "bridge".to_string();

        assert!(TransactionEntry::try_from(row).is_err());
    }

    #[test_case("1.5"; "fractional")]
    #[test_case("-1"; "negative")]
    #[test_case("1157920892373161954235709850086879078532699846656405640394575840079131296399350"; "above u256")]
    fn unrepresentable_values_are_rejected(value: &str) {
        let value = BigDecimal::from_str(value).unwrap();

        assert!(bigdecimal_to_u256(value).is_err());
    }
}

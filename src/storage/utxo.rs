// Unspent output queries, recomputed by scanning the chain

use crate::consensus::ValidationError;
use crate::core::{Block, Hash256, KeyHash, Transaction, TxOutput};
use crate::storage::{Ledger, LedgerError};
use std::collections::{BTreeMap, HashSet};

/// Reference to one output of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    pub tx_id: Hash256,
    pub index: i32,
}

impl OutPoint {
    pub fn new(tx_id: Hash256, index: i32) -> Self {
        Self { tx_id, index }
    }

    /// Outputs consumed by `tx`; none for a coinbase
    pub fn spent_by(tx: &Transaction) -> Vec<OutPoint> {
        if tx.is_coinbase() {
            return Vec::new();
        }
        tx.inputs
            .iter()
            .map(|input| OutPoint::new(input.source_tx_id, input.output_index))
            .collect()
    }

    pub fn double_spend(&self) -> ValidationError {
        ValidationError::DoubleSpend {
            tx: self.tx_id,
            index: self.index,
        }
    }
}

/// Outputs consumed anywhere in `chain`
pub(super) fn spent_in_chain<I>(chain: I) -> Result<HashSet<OutPoint>, LedgerError>
where
    I: IntoIterator<Item = Result<Block, LedgerError>>,
{
    let mut spent = HashSet::new();
    for block in chain {
        for tx in &block?.transactions {
            spent.extend(OutPoint::spent_by(tx));
        }
    }
    Ok(spent)
}

/// Add the inputs of `tx` to `spent`. Fails without touching `spent` when an
/// input is already there or appears twice in `tx`.
pub(super) fn claim_inputs(spent: &mut HashSet<OutPoint>, tx: &Transaction) -> Result<(), ValidationError> {
    let mut fresh = HashSet::new();
    for outpoint in OutPoint::spent_by(tx) {
        if spent.contains(&outpoint) || !fresh.insert(outpoint) {
            return Err(outpoint.double_spend());
        }
    }
    spent.extend(fresh);
    Ok(())
}

/// Output not consumed by any later transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnspentOutput {
    pub outpoint: OutPoint,
    pub output: TxOutput,
}

/// Outputs selected to cover an amount
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpendableOutputs {
    pub total: u64,
    /// Source transaction id -> output indices
    pub outputs: BTreeMap<Hash256, Vec<i32>>,
}

/// Walks the chain newest-first, remembering which outputs later transactions spent
struct UnspentScan {
    spent: HashSet<OutPoint>,
}

impl UnspentScan {
    fn new() -> Self {
        Self { spent: HashSet::new() }
    }

    /// Unspent outputs of `tx` locked to `owner`, then mark what `tx` consumes
    fn visit<'a>(&mut self, tx: &'a Transaction, owner: &KeyHash) -> Vec<(OutPoint, &'a TxOutput)> {
        let found = tx
            .outputs
            .iter()
            .enumerate()
            .map(|(index, output)| (OutPoint::new(tx.id, index as i32), output))
            .filter(|(outpoint, output)| output.is_locked_with(owner) && !self.spent.contains(outpoint))
            .collect();

        self.spent.extend(OutPoint::spent_by(tx));
        found
    }
}

impl Ledger {
    /// Every unspent output locked to `owner`
    pub fn find_unspent_outputs(&self, owner: &KeyHash) -> Result<Vec<UnspentOutput>, LedgerError> {
        let mut scan = UnspentScan::new();
        let mut unspent = Vec::new();

        for block in self.iter() {
            let block = block?;
            for tx in block.transactions.iter().rev() {
                for (outpoint, output) in scan.visit(tx, owner) {
                    unspent.push(UnspentOutput {
                        outpoint,
                        output: output.clone(),
                    });
                }
            }
        }

        Ok(unspent)
    }

    /// Unspent outputs of `owner` accumulated until they cover `amount`.
    /// The total falls short only when the owner holds less than `amount`.
    pub fn find_spendable_outputs(&self, owner: &KeyHash, amount: u64) -> Result<SpendableOutputs, LedgerError> {
        let mut scan = UnspentScan::new();
        let mut spendable = SpendableOutputs::default();

        'chain: for block in self.iter() {
            let block = block?;
            for tx in block.transactions.iter().rev() {
                for (outpoint, output) in scan.visit(tx, owner) {
                    spendable.total += output.value;
                    spendable.outputs.entry(outpoint.tx_id).or_default().push(outpoint.index);

                    if spendable.total >= amount {
                        break 'chain;
                    }
                }
            }
        }

        Ok(spendable)
    }

    /// Sum of the unspent outputs locked to `owner`
    pub fn balance(&self, owner: &KeyHash) -> Result<u64, LedgerError> {
        Ok(self
            .find_unspent_outputs(owner)?
            .iter()
            .map(|unspent| unspent.output.value)
            .sum())
    }

    /// Outputs consumed by a transaction on the active chain
    pub fn spent_outputs(&self) -> Result<HashSet<OutPoint>, LedgerError> {
        spent_in_chain(self.iter())
    }
}

// Transaction builder

use crate::core::{Transaction, TxInput, TxOutput};
use crate::storage::{Ledger, LedgerError};
use crate::wallet::{Address, KeyPair, WalletError};

/// Builds spends from the chain's unspent outputs
pub struct TransactionBuilder<'a> {
    ledger: &'a Ledger,
}

impl<'a> TransactionBuilder<'a> {
    pub fn new(ledger: &'a Ledger) -> Self {
        Self { ledger }
    }

    /// Unsigned transaction paying `amount` from `from` to `to`, with change back to `from`
    pub fn build(&self, from: &Address, to: &Address, amount: u64) -> Result<Transaction, WalletError> {
        if amount == 0 {
            return Err(WalletError::ZeroAmount);
        }
        let from_hash = from.key_hash()?;
        let to_hash = to.key_hash()?;

        let spendable = self.ledger.find_spendable_outputs(&from_hash, amount)?;
        if spendable.total < amount {
            return Err(LedgerError::InsufficientFunds {
                have: spendable.total,
                need: amount,
            }
            .into());
        }

        let inputs = spendable
            .outputs
            .iter()
            .flat_map(|(tx_id, indices)| indices.iter().map(|index| TxInput::new(*tx_id, *index)))
            .collect();

        let mut outputs = vec![TxOutput::new(amount, to_hash)];
        if spendable.total > amount {
            outputs.push(TxOutput::new(spendable.total - amount, from_hash));
        }

        Ok(Transaction::new(inputs, outputs))
    }

    /// Build and sign with `keypair`, whose address is the sender
    pub fn build_signed(&self, keypair: &KeyPair, to: &Address, amount: u64) -> Result<Transaction, WalletError> {
        let mut tx = self.build(&keypair.address, to, amount)?;
        self.ledger.sign_transaction(&mut tx, &keypair.secret_key)?;
        Ok(tx)
    }

    pub fn get_balance(&self, address: &Address) -> Result<u64, WalletError> {
        Ok(self.ledger.balance(&address.key_hash()?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{CancelFlag, ProofOfWork};
    use crate::core::SUBSIDY;
    use crate::storage::BlockchainDB;

    fn funded(owner: &KeyPair, blocks: usize) -> Ledger {
        let ledger = Ledger::open(BlockchainDB::memory().unwrap(), ProofOfWork::new(8), &owner.address).unwrap();
        for _ in 0..blocks {
            ledger.append(&owner.address, vec![], &CancelFlag::new()).unwrap();
        }
        ledger
    }

    #[test]
    fn test_transaction_builder() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let ledger = funded(&alice, 0);
        let builder = TransactionBuilder::new(&ledger);

        let tx = builder.build(&alice.address, &bob.address, 30).unwrap();

        assert_eq!(tx.inputs.len(), 1);
        assert!(tx.inputs[0].signature.is_empty());
        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.outputs[0], TxOutput::new(30, bob.key_hash()));
        assert_eq!(tx.outputs[1], TxOutput::new(SUBSIDY - 30, alice.key_hash()));
    }

    #[test]
    fn test_exact_amount_has_no_change() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let ledger = funded(&alice, 1);
        let builder = TransactionBuilder::new(&ledger);

        let tx = builder.build(&alice.address, &bob.address, 2 * SUBSIDY).unwrap();
        assert_eq!(tx.inputs.len(), 2);
        assert_eq!(tx.outputs.len(), 1);
        assert_eq!(tx.total_output_value(), Ok(2 * SUBSIDY));
    }

    #[test]
    fn test_signed_transaction_verifies_and_mines() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let ledger = funded(&alice, 1);
        let builder = TransactionBuilder::new(&ledger);

        let tx = builder.build_signed(&alice, &bob.address, 70).unwrap();
        assert!(ledger.verify_transaction(&tx).is_ok());

        ledger.append(&bob.address, vec![tx], &CancelFlag::new()).unwrap();
        assert_eq!(builder.get_balance(&bob.address).unwrap(), 70 + SUBSIDY);
        assert_eq!(builder.get_balance(&alice.address).unwrap(), 2 * SUBSIDY - 70);
    }

    #[test]
    fn test_insufficient_funds() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let ledger = funded(&alice, 0);
        let builder = TransactionBuilder::new(&ledger);

        let result = builder.build(&alice.address, &bob.address, SUBSIDY + 1);
        assert!(matches!(
            result,
            Err(WalletError::Ledger(LedgerError::InsufficientFunds { have: SUBSIDY, need })) if need == SUBSIDY + 1
        ));
        assert!(result.unwrap_err().to_string().contains("insufficient funds"));
    }

    #[test]
    fn test_zero_amount_rejected() {
        let alice = KeyPair::generate();
        let ledger = funded(&alice, 0);
        let builder = TransactionBuilder::new(&ledger);

        assert!(matches!(
            builder.build(&alice.address, &alice.address, 0),
            Err(WalletError::ZeroAmount)
        ));
    }
}

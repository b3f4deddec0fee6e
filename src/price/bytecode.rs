//! Oracle discovery from contract creation code.
//!
//! Constructor arguments are ABI-encoded as 32-byte words appended to the
//! init code, so the last `arg_count` words of the creation input are the
//! arguments. An address argument is a word whose first 12 bytes are zero.

use super::PriceError;

const WORD_HEX: usize = 64;
const ADDRESS_HEX: usize = 40;

pub fn resolve_oracle_from_creation_code(
    bytecode: &str,
    arg_index: usize,
    arg_count: usize,
) -> Result<String, PriceError> {
    let code = bytecode.trim();
    let code = code.strip_prefix("0x").unwrap_or(code).to_lowercase();
    if !code.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(PriceError::Bytecode("not hex encoded".into()));
    }
    if arg_index >= arg_count {
        return Err(PriceError::Bytecode(format!(
            "argument {} out of range for {} constructor arguments",
            arg_index, arg_count
        )));
    }
    let tail_len = arg_count * WORD_HEX;
    if code.len() < tail_len {
        return Err(PriceError::Bytecode(format!(
            "{} hex chars cannot hold {} constructor arguments",
            code.len(),
            arg_count
        )));
    }

    let tail = &code[code.len() - tail_len..];
    let word = &tail[arg_index * WORD_HEX..(arg_index + 1) * WORD_HEX];
    let (padding, address) = word.split_at(WORD_HEX - ADDRESS_HEX);
    if padding.chars().any(|c| c != '0') {
        return Err(PriceError::Bytecode(format!("argument {} is not an address", arg_index)));
    }
    if address.chars().all(|c| c == '0') {
        return Err(PriceError::Bytecode(format!("argument {} is the zero address", arg_index)));
    }
    Ok(format!("0x{}", address))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORACLE: &str = "5f4ec3df9cbd43714fe2740f5e3616155c5b8419";

    fn word(hex: &str) -> String {
        format!("{:0>64}", hex)
    }

    fn creation_code(args: &[String]) -> String {
        // Arbitrary init code followed by the encoded constructor arguments.
        format!("0x608060405234801561001057600080fd5b50{}", args.concat())
    }

    #[test]
    fn extracts_address_from_slot_two() {
        let args = vec![
            word("1"),
            word("e10"),
            word(ORACLE),
            word("15180"),
            word("cd5fe23c85820f7b72d0926fc9b05b43e359b7ee"),
            word("0"),
        ];
        let tail = args.concat();
        assert_eq!(tail.len(), 384);

        let code = creation_code(&args);
        let address = resolve_oracle_from_creation_code(&code, 2, 6).unwrap();
        assert_eq!(address, format!("0x{}", ORACLE));
        assert_eq!(
            resolve_oracle_from_creation_code(&code, 4, 6).unwrap(),
            "0xcd5fe23c85820f7b72d0926fc9b05b43e359b7ee"
        );
    }

    #[test]
    fn rejects_non_address_words() {
        let args = vec![word("1"), "f".repeat(64), word("0")];
        let code = creation_code(&args);
        assert!(resolve_oracle_from_creation_code(&code, 1, 3).is_err());
        assert!(resolve_oracle_from_creation_code(&code, 2, 3).is_err());
    }

    #[test]
    fn rejects_out_of_range_requests() {
        let code = creation_code(&[word(ORACLE)]);
        assert!(resolve_oracle_from_creation_code(&code, 1, 1).is_err());
        assert!(resolve_oracle_from_creation_code("0x1234", 0, 1).is_err());
        assert!(resolve_oracle_from_creation_code("0xzz", 0, 1).is_err());
    }

    #[test]
    fn accepts_uppercase_without_prefix() {
        let code = creation_code(&[word(&ORACLE.to_uppercase())]);
        let code = code.trim_start_matches("0x");
        assert_eq!(
            resolve_oracle_from_creation_code(code, 0, 1).unwrap(),
            format!("0x{}", ORACLE)
        );
    }
}

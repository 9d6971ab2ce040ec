//! Method bodies as they cross the native boundary.
//!
//! A [`RawMethodBody`] is decoded from the separate buffers the engine passes to the
//! instrumentation callback: the IL code, the exception handler table, the module's
//! [`SignatureTokens`] block and the assembly and module names as UTF-16LE. The policy's
//! answer is an [`InstrumentedMethodBody`] whose handler table is flattened again by
//! [`InstrumentedMethodBody::ehs_bytes`].
//!
//! [`RawMethodBody::to_request`] packs a body into one length-prefixed buffer so recorded
//! requests can be stored and replayed against a policy outside the engine.

use widestring::U16String;

use crate::{
    file::{
        io::{push_le, read_le_at},
        parser::Parser,
    },
    method::ExceptionHandler,
    Result,
};

/// Layout revision of [`SignatureTokens`]; bumped whenever the token list changes.
pub const SIGNATURE_TOKENS_VERSION: u32 = 1;

/// Number of probe signature tokens the native engine hands over.
pub const SIGNATURE_TOKEN_COUNT: usize = 95;

/// Metadata tokens of the probe signatures emitted into every instrumented module.
///
/// The native engine defines one standalone signature per probe shape and passes the
/// resulting tokens along with every method body, in a fixed order. Both sides must agree on
/// the byte size of the block, which is validated on every call.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureTokens {
    /// Tokens in probe order
    pub tokens: [u32; SIGNATURE_TOKEN_COUNT],
}

const _: () = assert!(std::mem::size_of::<SignatureTokens>() == SignatureTokens::SIZE);

impl Default for SignatureTokens {
    fn default() -> Self {
        SignatureTokens {
            tokens: [0; SIGNATURE_TOKEN_COUNT],
        }
    }
}

impl SignatureTokens {
    /// Byte size of the block on the wire.
    pub const SIZE: usize = SIGNATURE_TOKEN_COUNT * 4;

    /// Decode the block.
    ///
    /// # Errors
    /// Returns [`crate::Error::Protocol`] if `data` is not exactly [`SignatureTokens::SIZE`]
    /// bytes long, which means the two sides were built against different layouts.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != Self::SIZE {
            return Err(protocol_error!(
                "Signature token block is {} bytes, expected {} (layout version {})",
                data.len(),
                Self::SIZE,
                SIGNATURE_TOKENS_VERSION
            ));
        }

        let mut tokens = [0_u32; SIGNATURE_TOKEN_COUNT];
        let mut offset = 0;
        for token in &mut tokens {
            *token = read_le_at::<u32>(data, &mut offset)?;
        }
        Ok(SignatureTokens { tokens })
    }

    /// Encode the block.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        for token in self.tokens {
            push_le(&mut out, token);
        }
        out
    }

    /// Token of probe `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<u32> {
        self.tokens.get(index).copied()
    }
}

/// A method body as received from the native engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMethodBody {
    /// Method definition token
    pub token: u32,
    /// Name of the declaring assembly
    pub assembly_name: String,
    /// Name of the declaring module
    pub module_name: String,
    /// IL bytecode
    pub code: Vec<u8>,
    /// Exception handling clauses
    pub exception_handlers: Vec<ExceptionHandler>,
    /// Maximum evaluation stack depth
    pub max_stack: u32,
    /// Probe signature tokens of the declaring module
    pub signature_tokens: SignatureTokens,
}

/// A method body after instrumentation, ready to go back to the native engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentedMethodBody {
    /// IL bytecode
    pub code: Vec<u8>,
    /// Exception handling clauses
    pub exception_handlers: Vec<ExceptionHandler>,
    /// Maximum evaluation stack depth
    pub max_stack: u32,
}

fn decode_utf16(data: &[u8], what: &str) -> Result<String> {
    if data.len() % 2 != 0 {
        return Err(protocol_error!(
            "{} has odd UTF-16 byte length {}",
            what,
            data.len()
        ));
    }

    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok(U16String::from_vec(units).to_string_lossy())
}

fn encode_utf16(value: &str) -> Vec<u8> {
    U16String::from_str(value)
        .into_vec()
        .into_iter()
        .flat_map(u16::to_le_bytes)
        .collect()
}

impl RawMethodBody {
    /// Assemble a body from the pieces of an instrumentation request.
    ///
    /// Names arrive as UTF-16LE bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::Protocol`] for a signature token block of the wrong size or a
    /// name with an odd byte length, and [`crate::Error::Malformed`] for a truncated exception
    /// handler table.
    pub fn from_parts(
        token: u32,
        assembly_name: &[u8],
        module_name: &[u8],
        code: &[u8],
        ehs: &[u8],
        max_stack: u32,
        signature_tokens: &[u8],
    ) -> Result<Self> {
        let signature_tokens = SignatureTokens::from_bytes(signature_tokens)?;
        Ok(RawMethodBody {
            token,
            assembly_name: decode_utf16(assembly_name, "Assembly name")?,
            module_name: decode_utf16(module_name, "Module name")?,
            code: code.to_vec(),
            exception_handlers: ExceptionHandler::parse_table(ehs)?,
            max_stack,
            signature_tokens,
        })
    }

    /// The body handed back unchanged.
    #[must_use]
    pub fn unchanged(&self) -> InstrumentedMethodBody {
        InstrumentedMethodBody {
            code: self.code.clone(),
            exception_handlers: self.exception_handlers.clone(),
            max_stack: self.max_stack,
        }
    }

    /// Serialize into the single-buffer request form used when the body is shipped to an
    /// out-of-process instrumenter.
    ///
    /// The buffer holds a one-byte `instrumentation_enabled` flag, then `token`, code length,
    /// assembly name byte length, module name byte length, `max_stack` and signature token
    /// block length as little-endian `u32`, then the token block, both names as UTF-16LE, the
    /// code, and the exception handler table filling the rest.
    #[must_use]
    pub fn to_request(&self, instrumentation_enabled: bool) -> Vec<u8> {
        let assembly_name = encode_utf16(&self.assembly_name);
        let module_name = encode_utf16(&self.module_name);
        let tokens = self.signature_tokens.to_bytes();
        let ehs = ExceptionHandler::write_table(&self.exception_handlers);

        let variable = tokens.len() + assembly_name.len() + module_name.len();
        let mut out = Vec::with_capacity(25 + variable + self.code.len() + ehs.len());
        push_le(&mut out, u8::from(instrumentation_enabled));
        push_le(&mut out, self.token);
        push_le(&mut out, self.code.len() as u32);
        push_le(&mut out, assembly_name.len() as u32);
        push_le(&mut out, module_name.len() as u32);
        push_le(&mut out, self.max_stack);
        push_le(&mut out, tokens.len() as u32);
        out.extend_from_slice(&tokens);
        out.extend_from_slice(&assembly_name);
        out.extend_from_slice(&module_name);
        out.extend_from_slice(&self.code);
        out.extend_from_slice(&ehs);
        out
    }

    /// Parse the request form written by [`RawMethodBody::to_request`].
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for a truncated buffer and the errors of
    /// [`RawMethodBody::from_parts`].
    pub fn from_request(data: &[u8]) -> Result<(bool, Self)> {
        let mut parser = Parser::new(data);
        let enabled = parser.read_le::<u8>()? != 0;
        let token = parser.read_le::<u32>()?;
        let code_length = parser.read_le::<u32>()? as usize;
        let assembly_name_length = parser.read_le::<u32>()? as usize;
        let module_name_length = parser.read_le::<u32>()? as usize;
        let max_stack = parser.read_le::<u32>()?;
        let tokens_length = parser.read_le::<u32>()? as usize;

        let tokens = parser.read_bytes(tokens_length)?;
        let assembly_name = parser.read_bytes(assembly_name_length)?;
        let module_name = parser.read_bytes(module_name_length)?;
        let code = parser.read_bytes(code_length)?;
        let ehs = parser.read_bytes(parser.remaining())?;

        let body = Self::from_parts(
            token,
            assembly_name,
            module_name,
            code,
            ehs,
            max_stack,
            tokens,
        )?;
        Ok((enabled, body))
    }
}

impl InstrumentedMethodBody {
    /// The flattened exception handler table.
    #[must_use]
    pub fn ehs_bytes(&self) -> Vec<u8> {
        ExceptionHandler::write_table(&self.exception_handlers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{method::ExceptionHandlerFlags, Error};

    fn utf16(value: &str) -> Vec<u8> {
        encode_utf16(value)
    }

    fn sample_body() -> RawMethodBody {
        let mut signature_tokens = SignatureTokens::default();
        signature_tokens.tokens[0] = 0x1100_0001;
        signature_tokens.tokens[94] = 0x1100_005F;

        RawMethodBody {
            token: 0x0600_0012,
            assembly_name: "Tests".to_string(),
            module_name: "Tests.dll".to_string(),
            code: vec![0x00, 0x2A],
            exception_handlers: vec![ExceptionHandler {
                flags: ExceptionHandlerFlags::FAULT,
                try_offset: 0,
                try_length: 1,
                handler_offset: 1,
                handler_length: 1,
                class_token_or_filter: 0,
            }],
            max_stack: 8,
            signature_tokens,
        }
    }

    #[test]
    fn signature_token_block_size() {
        assert_eq!(SignatureTokens::SIZE, 380);

        let tokens = SignatureTokens::from_bytes(&[0x01; 380]).unwrap();
        assert_eq!(tokens.get(94), Some(0x0101_0101));
        assert_eq!(tokens.get(95), None);

        for size in [0, 376, 379, 381, 384] {
            assert!(matches!(
                SignatureTokens::from_bytes(&vec![0; size]),
                Err(Error::Protocol(_))
            ));
        }
    }

    #[test]
    fn from_parts_decodes_names() {
        let body = sample_body();
        let parsed = RawMethodBody::from_parts(
            body.token,
            &utf16("Tests"),
            &utf16("Tests.dll"),
            &body.code,
            &ExceptionHandler::write_table(&body.exception_handlers),
            body.max_stack,
            &body.signature_tokens.to_bytes(),
        )
        .unwrap();

        assert_eq!(parsed, body);
        assert_eq!(parsed.unchanged().ehs_bytes().len(), 24);
    }

    #[test]
    fn odd_name_length_is_a_protocol_error() {
        let result = RawMethodBody::from_parts(
            1,
            &[0x41, 0x00, 0x42],
            &utf16("m"),
            &[],
            &[],
            0,
            &[0; SignatureTokens::SIZE],
        );
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn request_buffer() {
        let body = sample_body();
        let request = body.to_request(true);

        assert_eq!(request[0], 1);
        assert_eq!(&request[1..5], &0x0600_0012_u32.to_le_bytes());
        assert_eq!(&request[21..25], &380_u32.to_le_bytes());
        assert_eq!(request.len(), 25 + 380 + 10 + 18 + 2 + 24);

        let (enabled, parsed) = RawMethodBody::from_request(&request).unwrap();
        assert!(enabled);
        assert_eq!(parsed, body);

        assert!(matches!(
            RawMethodBody::from_request(&request[..100]),
            Err(Error::OutOfBounds)
        ));
    }
}

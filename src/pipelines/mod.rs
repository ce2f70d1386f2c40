pub mod transcript_quant;
